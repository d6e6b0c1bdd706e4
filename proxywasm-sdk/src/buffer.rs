//! Generic access to host byte buffers
//!
//! Bodies, connection data, callout bodies and configuration all live in host
//! buffers selected by [`BufferType`]. The typed modules wrap these two calls.

use crate::error::Result;
use crate::hostcall;
use proxywasm_api::{BufferMode, BufferType, HostError};

/// Copy `[start, start + max_size)` of a buffer; `None` when it is empty or absent
pub fn get_buffer(
    buffer_type: BufferType,
    start: usize,
    max_size: usize,
) -> Result<Option<Vec<u8>>> {
    let mut data = Vec::new();
    match hostcall::host()
        .get_buffer_bytes(buffer_type as u32, start, max_size, &mut data)
        .into_result()
    {
        Ok(()) => Ok(Some(data)),
        Err(HostError::NotFound) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Write `data` into a buffer in the given mode
pub fn set_buffer(buffer_type: BufferType, mode: BufferMode, data: &[u8]) -> Result<()> {
    let (start, max_size) = mode.range();
    hostcall::host()
        .set_buffer_bytes(buffer_type as u32, start, max_size, data)
        .into_result()?;
    Ok(())
}
