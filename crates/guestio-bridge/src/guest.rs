//! The guest side of the bridge.
//!
//! [`Guest`] is everything the bridge needs from a guest instance: a view of
//! its linear memory and the three exports used to deliver a result.  The
//! wasmtime adapter in [`crate::wasm`] implements it for real modules; tests
//! implement it over a plain `Vec<u8>`.
//!
//! Memory views borrow the guest, and every export call takes `&mut self`,
//! so a view obtained before a guest call cannot be used after it.

use std::fmt;

use crate::error::{LoadErrorCode, Result};

/// Guest-defined handler identifier, passed back untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackToken(pub u32);

/// Guest execution-context handle, fetched right before each guest call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextToken(pub u32);

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A guest instance the bridge can deliver results into.
pub trait Guest {
    /// Current linear memory.
    fn memory(&self) -> &[u8];

    /// Current linear memory, writable.
    fn memory_mut(&mut self) -> &mut [u8];

    /// The guest's active execution context.
    fn current_execution_context(&mut self) -> Result<ContextToken>;

    /// Ask the guest to allocate `len` bytes; returns the base address.
    ///
    /// May grow (and relocate) guest memory.
    fn allocate(&mut self, len: u32, context: ContextToken) -> Result<u32>;

    /// Hand a filled buffer to the handler identified by `token`.
    fn dispatch_callback(
        &mut self,
        address: u32,
        len: u32,
        token: CallbackToken,
        context: ContextToken,
    ) -> Result<()>;

    /// Tell the handler identified by `token` that its load failed.
    ///
    /// Guests without a dedicated failure entry point get a zero-length
    /// callback whose address slot carries the error code.
    fn dispatch_failure(
        &mut self,
        token: CallbackToken,
        code: LoadErrorCode,
        context: ContextToken,
    ) -> Result<()> {
        tracing::debug!(callback_token = %token, %code, "no failure entry point, sending sentinel callback");
        self.dispatch_callback(code.as_u32(), 0, token, context)
    }
}
