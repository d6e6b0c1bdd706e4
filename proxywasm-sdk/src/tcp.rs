//! TCP connection host calls

use crate::buffer::{get_buffer, set_buffer};
use crate::error::Result;
use crate::hostcall;
use proxywasm_api::{BufferMode, BufferType, StreamType};

/// Bytes `[start, start + max_size)` of the buffered downstream data
pub fn get_downstream_data(start: usize, max_size: usize) -> Result<Option<Vec<u8>>> {
    get_buffer(BufferType::DownstreamData, start, max_size)
}

pub fn append_downstream_data(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::DownstreamData, BufferMode::Append, data)
}

pub fn prepend_downstream_data(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::DownstreamData, BufferMode::Prepend, data)
}

pub fn replace_downstream_data(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::DownstreamData, BufferMode::Replace, data)
}

/// Bytes `[start, start + max_size)` of the buffered upstream data
pub fn get_upstream_data(start: usize, max_size: usize) -> Result<Option<Vec<u8>>> {
    get_buffer(BufferType::UpstreamData, start, max_size)
}

pub fn append_upstream_data(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::UpstreamData, BufferMode::Append, data)
}

pub fn prepend_upstream_data(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::UpstreamData, BufferMode::Prepend, data)
}

pub fn replace_upstream_data(data: &[u8]) -> Result<()> {
    set_buffer(BufferType::UpstreamData, BufferMode::Replace, data)
}

fn continue_stream(stream: StreamType) -> Result<()> {
    hostcall::host().continue_stream(stream as u32).into_result()?;
    Ok(())
}

fn close_stream(stream: StreamType) -> Result<()> {
    hostcall::host().close_stream(stream as u32).into_result()?;
    Ok(())
}

/// Resume downstream data paused by a hook
pub fn resume_downstream() -> Result<()> {
    continue_stream(StreamType::Downstream)
}

/// Resume upstream data paused by a hook
pub fn resume_upstream() -> Result<()> {
    continue_stream(StreamType::Upstream)
}

pub fn close_downstream() -> Result<()> {
    close_stream(StreamType::Downstream)
}

pub fn close_upstream() -> Result<()> {
    close_stream(StreamType::Upstream)
}
