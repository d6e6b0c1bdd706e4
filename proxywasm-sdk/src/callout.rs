//! Out-of-band HTTP calls
//!
//! A callout is dispatched from any context; its response arrives later as a
//! separate host call on the owning plugin. The callback registered here is
//! run exactly once, with the dispatching context active again, or dropped if
//! that context is deleted first.

use crate::buffer::get_buffer;
use crate::dispatcher::{self, CalloutCallback};
use crate::error::{Error, Result};
use crate::hostcall;
use crate::http::{get_map, get_map_value};
use proxywasm_api::codec::serialize_map;
use proxywasm_api::{BufferType, Headers, HostError, MapType};
use std::time::Duration;

/// Dispatch an HTTP call to `upstream` and register `callback` for its response
///
/// `callback` receives `(num_headers, body_size, num_trailers)`; a timed-out
/// call arrives with all three at zero. Returns the host's callout id.
pub fn dispatch_http_call<K, V, F>(
    upstream: &str,
    headers: &[(K, V)],
    body: Option<&[u8]>,
    trailers: &[(K, V)],
    timeout: Duration,
    callback: F,
) -> Result<u32>
where
    K: AsRef<str>,
    V: AsRef<str>,
    F: FnOnce(usize, usize, usize) + 'static,
{
    let caller_id = dispatcher::active_context_id();
    let plugin_id = dispatcher::plugin_id_of(caller_id).ok_or(Error::NoActiveContext(caller_id))?;
    let timeout_ms = u32::try_from(timeout.as_millis()).map_err(|_| HostError::BadArgument)?;

    let headers: Vec<(&str, &str)> = headers
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect();
    let trailers: Vec<(&str, &str)> = trailers
        .iter()
        .map(|(k, v)| (k.as_ref(), v.as_ref()))
        .collect();

    let mut callout_id = 0;
    hostcall::host()
        .http_call(
            upstream.as_bytes(),
            &serialize_map(&headers),
            body.unwrap_or_default(),
            &serialize_map(&trailers),
            timeout_ms,
            &mut callout_id,
        )
        .into_result()?;

    let callback: CalloutCallback = Box::new(callback);
    dispatcher::register_callout(plugin_id, callout_id, caller_id, callback);
    tracing::debug!(upstream, callout_id, caller_id, "http call dispatched");
    Ok(callout_id)
}

/// Headers of the callout response being delivered
pub fn get_http_call_response_headers() -> Result<Headers> {
    get_map(MapType::HttpCallResponseHeaders)
}

pub fn get_http_call_response_header(name: &str) -> Result<Option<String>> {
    get_map_value(MapType::HttpCallResponseHeaders, name)
}

/// Bytes `[start, start + max_size)` of the callout response body
pub fn get_http_call_response_body(start: usize, max_size: usize) -> Result<Option<Vec<u8>>> {
    get_buffer(BufferType::HttpCallResponseBody, start, max_size)
}

pub fn get_http_call_response_trailers() -> Result<Headers> {
    get_map(MapType::HttpCallResponseTrailers)
}

pub fn get_http_call_response_trailer(name: &str) -> Result<Option<String>> {
    get_map_value(MapType::HttpCallResponseTrailers, name)
}
