//! Marshaling fetched bytes into the guest and invoking its callback.
//!
//! [`copy_into_guest`] and [`invoke`] together run the delivery sequence for
//! one successful fetch:
//!
//! 1. fetch a fresh execution context from the guest;
//! 2. ask the guest to allocate the destination buffer;
//! 3. take a new view of guest memory and check the buffer lies inside it;
//! 4. copy the bytes verbatim;
//! 5. dispatch the callback with `(address, len, token, context)`.
//!
//! An empty resource skips steps 2-4 and is placed at address 0, so a
//! zero-length callback with a non-zero address is always a failure sentinel.
//!
//! They are split so that the caller knows whether the callback was reached:
//! a failure before step 5 is reported to the guest through
//! [`signal_failure`], a trap inside the callback is not.

use tracing::{debug, error};

use crate::error::{BridgeError, LoadErrorCode, Result};
use crate::guest::{CallbackToken, ContextToken, Guest};
use crate::reader::guest_range;

/// A destination buffer that has been allocated and filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// Guest address of the buffer.
    pub address: u32,
    /// Buffer length in bytes.
    pub len: u32,
    /// Context the buffer was allocated under; reused for the callback.
    pub context: ContextToken,
}

/// Allocate a guest buffer for `bytes` and copy them in (steps 1-4).
pub fn copy_into_guest<G: Guest + ?Sized>(guest: &mut G, bytes: &[u8]) -> Result<Placement> {
    let len = u32::try_from(bytes.len()).map_err(|_| BridgeError::ResourceTooLarge {
        len: bytes.len(),
        limit: u32::MAX as usize,
    })?;

    let context = guest.current_execution_context()?;
    if len == 0 {
        return Ok(Placement {
            address: 0,
            len,
            context,
        });
    }
    let address = guest.allocate(len, context)?;

    // Allocation may have grown memory; only the view taken now is valid.
    let memory = guest.memory_mut();
    let memory_size = memory.len();
    let Some(range) = guest_range(memory_size, address, len) else {
        error!(
            address,
            len, memory_size, "guest allocator returned a buffer outside its memory"
        );
        return Err(BridgeError::AllocationInvariantViolated {
            address,
            len,
            memory_size,
        });
    };
    memory[range].copy_from_slice(bytes);

    debug!(address, len, %context, "copied resource into guest");
    Ok(Placement {
        address,
        len,
        context,
    })
}

/// Invoke the guest callback for a filled buffer (step 5).
pub fn invoke<G: Guest + ?Sized>(
    guest: &mut G,
    placement: &Placement,
    token: CallbackToken,
) -> Result<()> {
    guest.dispatch_callback(placement.address, placement.len, token, placement.context)
}

/// Report a failed load to the guest, under a freshly fetched context.
pub fn signal_failure<G: Guest + ?Sized>(
    guest: &mut G,
    token: CallbackToken,
    code: LoadErrorCode,
) -> Result<ContextToken> {
    let context = guest.current_execution_context()?;
    guest.dispatch_failure(token, code, context)?;
    Ok(context)
}
