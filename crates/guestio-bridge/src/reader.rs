//! Checked access to guest memory.
//!
//! Guest memory may grow (and move) whenever the guest runs, so nothing here
//! keeps a view around: every helper takes the current slice and re-checks
//! the requested range against its length.

use std::ops::Range;

use crate::error::{BridgeError, Result};

/// Byte range `[offset, offset + len)` if it fits inside `memory_size`.
pub(crate) fn guest_range(memory_size: usize, offset: u32, len: u32) -> Option<Range<usize>> {
    let start = offset as usize;
    let end = start.checked_add(len as usize)?;
    (end <= memory_size).then_some(start..end)
}

/// Borrow `len` bytes at `offset`.
pub fn read_bytes(memory: &[u8], offset: u32, len: u32) -> Result<&[u8]> {
    let range = guest_range(memory.len(), offset, len).ok_or(BridgeError::OutOfBounds {
        offset,
        len,
        memory_size: memory.len(),
    })?;
    Ok(&memory[range])
}

/// Decode `len` bytes at `offset` as UTF-8 and copy them out.
pub fn read_string(memory: &[u8], offset: u32, len: u32) -> Result<String> {
    let bytes = read_bytes(memory, offset, len)?;
    Ok(std::str::from_utf8(bytes)?.to_owned())
}
