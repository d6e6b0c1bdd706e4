//! Entry points the host calls
//!
//! Each export forwards to the dispatcher. With the `timing` feature every
//! export also logs `"<name> took <duration>"` at debug level through the
//! host, measured with the host clock.
//!
//! The exports use the `C-unwind` ABI: on wasm32 a panic still traps, while
//! an in-process host sees a fatal error as an ordinary panic it can catch.

use crate::dispatcher;
use proxywasm_api::{Action, PeerType};

#[cfg(feature = "timing")]
fn timed<R>(name: &str, f: impl FnOnce() -> R) -> R {
    use crate::{logging, plugin};
    use proxywasm_api::LogLevel;

    let started = plugin::current_time().ok();
    let result = f();
    if let (Some(started), Ok(finished)) = (started, plugin::current_time()) {
        let elapsed = finished.duration_since(started).unwrap_or_default();
        let _ = logging::log(LogLevel::Debug, &format!("{name} took {elapsed:?}"));
    }
    result
}

#[cfg(not(feature = "timing"))]
#[inline(always)]
fn timed<R>(_name: &str, f: impl FnOnce() -> R) -> R {
    f()
}

/// Run one export body
///
/// A host may call back into the module from inside a host call, so the
/// outer active context is put back once the nested export returns.
fn entry<R>(name: &str, f: impl FnOnce() -> R) -> R {
    let outer = dispatcher::active_context_id();
    let result = timed(name, f);
    dispatcher::set_active_context(outer);
    result
}

fn flag(value: bool) -> u32 {
    u32::from(value)
}

/// Marker the host checks to pick the ABI version
#[no_mangle]
pub extern "C-unwind" fn proxy_abi_version_0_2_1() {}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_memory_allocate(size: usize) -> *mut u8 {
    crate::memory::allocate(size)
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_context_create(context_id: u32, parent_context_id: u32) {
    entry("proxy_on_context_create", || {
        dispatcher::on_context_create(context_id, parent_context_id)
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_vm_start(context_id: u32, vm_configuration_size: usize) -> u32 {
    entry("proxy_on_vm_start", || {
        flag(dispatcher::on_vm_start(context_id, vm_configuration_size))
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_configure(
    context_id: u32,
    plugin_configuration_size: usize,
) -> u32 {
    entry("proxy_on_configure", || {
        flag(dispatcher::on_configure(context_id, plugin_configuration_size))
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_tick(context_id: u32) {
    entry("proxy_on_tick", || dispatcher::on_tick(context_id))
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_queue_ready(context_id: u32, queue_id: u32) {
    entry("proxy_on_queue_ready", || dispatcher::on_queue_ready(context_id, queue_id))
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_request_headers(
    context_id: u32,
    num_headers: usize,
    end_of_stream: bool,
) -> Action {
    entry("proxy_on_request_headers", || {
        dispatcher::on_http_request_headers(context_id, num_headers, end_of_stream)
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_request_body(
    context_id: u32,
    body_size: usize,
    end_of_stream: bool,
) -> Action {
    entry("proxy_on_request_body", || {
        dispatcher::on_http_request_body(context_id, body_size, end_of_stream)
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_request_trailers(context_id: u32, num_trailers: usize) -> Action {
    entry("proxy_on_request_trailers", || {
        dispatcher::on_http_request_trailers(context_id, num_trailers)
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_response_headers(
    context_id: u32,
    num_headers: usize,
    end_of_stream: bool,
) -> Action {
    entry("proxy_on_response_headers", || {
        dispatcher::on_http_response_headers(context_id, num_headers, end_of_stream)
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_response_body(
    context_id: u32,
    body_size: usize,
    end_of_stream: bool,
) -> Action {
    entry("proxy_on_response_body", || {
        dispatcher::on_http_response_body(context_id, body_size, end_of_stream)
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_response_trailers(
    context_id: u32,
    num_trailers: usize,
) -> Action {
    entry("proxy_on_response_trailers", || {
        dispatcher::on_http_response_trailers(context_id, num_trailers)
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_http_call_response(
    context_id: u32,
    callout_id: u32,
    num_headers: usize,
    body_size: usize,
    num_trailers: usize,
) {
    entry("proxy_on_http_call_response", || {
        dispatcher::on_http_call_response(
            context_id,
            callout_id,
            num_headers,
            body_size,
            num_trailers,
        )
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_new_connection(context_id: u32) -> Action {
    entry("proxy_on_new_connection", || dispatcher::on_new_connection(context_id))
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_downstream_data(
    context_id: u32,
    data_size: usize,
    end_of_stream: bool,
) -> Action {
    entry("proxy_on_downstream_data", || {
        dispatcher::on_downstream_data(context_id, data_size, end_of_stream)
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_downstream_connection_close(context_id: u32, peer_type: u32) {
    entry("proxy_on_downstream_connection_close", || {
        dispatcher::on_downstream_close(context_id, PeerType::from(peer_type))
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_upstream_data(
    context_id: u32,
    data_size: usize,
    end_of_stream: bool,
) -> Action {
    entry("proxy_on_upstream_data", || {
        dispatcher::on_upstream_data(context_id, data_size, end_of_stream)
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_upstream_connection_close(context_id: u32, peer_type: u32) {
    entry("proxy_on_upstream_connection_close", || {
        dispatcher::on_upstream_close(context_id, PeerType::from(peer_type))
    })
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_log(context_id: u32) {
    entry("proxy_on_log", || dispatcher::on_log(context_id))
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_done(context_id: u32) -> u32 {
    entry("proxy_on_done", || flag(dispatcher::on_done(context_id)))
}

#[no_mangle]
pub extern "C-unwind" fn proxy_on_delete(context_id: u32) {
    entry("proxy_on_delete", || dispatcher::on_delete(context_id))
}
