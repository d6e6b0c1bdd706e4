//! Imports linked directly to the proxy on `wasm32`
//!
//! Output buffers are allocated by the host through
//! `proxy_on_memory_allocate` and handed back as `(pointer, size)`; the guest
//! takes ownership of that allocation.

#![allow(unsafe_code)]

use super::ProxyHost;
use crate::memory;
use proxywasm_api::Status;
use std::ptr::null_mut;

#[link(wasm_import_module = "env")]
extern "C" {
    fn proxy_log(level: u32, message_data: *const u8, message_size: usize) -> u32;
    fn proxy_get_log_level(return_level: *mut u32) -> u32;
    fn proxy_get_current_time_nanoseconds(return_time: *mut u64) -> u32;
    fn proxy_set_tick_period_milliseconds(period: u32) -> u32;

    fn proxy_get_buffer_bytes(
        buffer_type: u32,
        start: usize,
        max_size: usize,
        return_buffer_data: *mut *mut u8,
        return_buffer_size: *mut usize,
    ) -> u32;
    fn proxy_set_buffer_bytes(
        buffer_type: u32,
        start: usize,
        size: usize,
        buffer_data: *const u8,
        buffer_size: usize,
    ) -> u32;

    fn proxy_get_header_map_pairs(
        map_type: u32,
        return_map_data: *mut *mut u8,
        return_map_size: *mut usize,
    ) -> u32;
    fn proxy_set_header_map_pairs(map_type: u32, map_data: *const u8, map_size: usize) -> u32;
    fn proxy_get_header_map_value(
        map_type: u32,
        key_data: *const u8,
        key_size: usize,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
    ) -> u32;
    fn proxy_add_header_map_value(
        map_type: u32,
        key_data: *const u8,
        key_size: usize,
        value_data: *const u8,
        value_size: usize,
    ) -> u32;
    fn proxy_replace_header_map_value(
        map_type: u32,
        key_data: *const u8,
        key_size: usize,
        value_data: *const u8,
        value_size: usize,
    ) -> u32;
    fn proxy_remove_header_map_value(map_type: u32, key_data: *const u8, key_size: usize) -> u32;

    fn proxy_send_local_response(
        status_code: u32,
        status_code_details_data: *const u8,
        status_code_details_size: usize,
        body_data: *const u8,
        body_size: usize,
        headers_data: *const u8,
        headers_size: usize,
        grpc_status: i32,
    ) -> u32;
    fn proxy_continue_stream(stream_type: u32) -> u32;
    fn proxy_close_stream(stream_type: u32) -> u32;

    fn proxy_http_call(
        upstream_data: *const u8,
        upstream_size: usize,
        headers_data: *const u8,
        headers_size: usize,
        body_data: *const u8,
        body_size: usize,
        trailers_data: *const u8,
        trailers_size: usize,
        timeout: u32,
        return_token: *mut u32,
    ) -> u32;
    fn proxy_call_foreign_function(
        function_name_data: *const u8,
        function_name_size: usize,
        arguments_data: *const u8,
        arguments_size: usize,
        results_data: *mut *mut u8,
        results_size: *mut usize,
    ) -> u32;

    fn proxy_get_shared_data(
        key_data: *const u8,
        key_size: usize,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
        return_cas: *mut u32,
    ) -> u32;
    fn proxy_set_shared_data(
        key_data: *const u8,
        key_size: usize,
        value_data: *const u8,
        value_size: usize,
        cas: u32,
    ) -> u32;

    fn proxy_register_shared_queue(
        name_data: *const u8,
        name_size: usize,
        return_id: *mut u32,
    ) -> u32;
    fn proxy_resolve_shared_queue(
        vm_id_data: *const u8,
        vm_id_size: usize,
        name_data: *const u8,
        name_size: usize,
        return_id: *mut u32,
    ) -> u32;
    fn proxy_enqueue_shared_queue(queue_id: u32, value_data: *const u8, value_size: usize) -> u32;
    fn proxy_dequeue_shared_queue(
        queue_id: u32,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
    ) -> u32;

    fn proxy_define_metric(
        metric_type: u32,
        name_data: *const u8,
        name_size: usize,
        return_id: *mut u32,
    ) -> u32;
    fn proxy_increment_metric(metric_id: u32, offset: i64) -> u32;
    fn proxy_record_metric(metric_id: u32, value: u64) -> u32;
    fn proxy_get_metric(metric_id: u32, return_value: *mut u64) -> u32;

    fn proxy_get_property(
        path_data: *const u8,
        path_size: usize,
        return_value_data: *mut *mut u8,
        return_value_size: *mut usize,
    ) -> u32;
    fn proxy_set_property(
        path_data: *const u8,
        path_size: usize,
        value_data: *const u8,
        value_size: usize,
    ) -> u32;

    fn proxy_set_effective_context(context_id: u32) -> u32;
    fn proxy_done() -> u32;
}

/// Host reached through the module's import table
pub struct WasmHost;

/// Run an import that hands back a host-allocated buffer and adopt the buffer
fn with_return_buffer(
    return_data: &mut Vec<u8>,
    call: impl FnOnce(*mut *mut u8, *mut usize) -> u32,
) -> Status {
    let mut data: *mut u8 = null_mut();
    let mut size: usize = 0;
    let status = Status::from_raw(call(&mut data, &mut size));
    if status.is_ok() {
        // SAFETY: the host allocated `size` bytes at `data` with
        // proxy_on_memory_allocate and transferred ownership to us
        *return_data = unsafe { memory::reclaim(data, size) };
    }
    status
}

impl ProxyHost for WasmHost {
    fn log(&self, level: u32, message: &[u8]) -> Status {
        Status::from_raw(unsafe { proxy_log(level, message.as_ptr(), message.len()) })
    }

    fn get_log_level(&self, return_level: &mut u32) -> Status {
        Status::from_raw(unsafe { proxy_get_log_level(return_level) })
    }

    fn get_current_time_nanoseconds(&self, return_time: &mut u64) -> Status {
        Status::from_raw(unsafe { proxy_get_current_time_nanoseconds(return_time) })
    }

    fn set_tick_period_milliseconds(&self, period: u32) -> Status {
        Status::from_raw(unsafe { proxy_set_tick_period_milliseconds(period) })
    }

    fn get_buffer_bytes(
        &self,
        buffer_type: u32,
        start: usize,
        max_size: usize,
        return_data: &mut Vec<u8>,
    ) -> Status {
        with_return_buffer(return_data, |data, size| unsafe {
            proxy_get_buffer_bytes(buffer_type, start, max_size, data, size)
        })
    }

    fn set_buffer_bytes(
        &self,
        buffer_type: u32,
        start: usize,
        max_size: usize,
        data: &[u8],
    ) -> Status {
        Status::from_raw(unsafe {
            proxy_set_buffer_bytes(buffer_type, start, max_size, data.as_ptr(), data.len())
        })
    }

    fn get_header_map_pairs(&self, map_type: u32, return_data: &mut Vec<u8>) -> Status {
        with_return_buffer(return_data, |data, size| unsafe {
            proxy_get_header_map_pairs(map_type, data, size)
        })
    }

    fn set_header_map_pairs(&self, map_type: u32, data: &[u8]) -> Status {
        Status::from_raw(unsafe { proxy_set_header_map_pairs(map_type, data.as_ptr(), data.len()) })
    }

    fn get_header_map_value(
        &self,
        map_type: u32,
        key: &[u8],
        return_value: &mut Vec<u8>,
    ) -> Status {
        with_return_buffer(return_value, |data, size| unsafe {
            proxy_get_header_map_value(map_type, key.as_ptr(), key.len(), data, size)
        })
    }

    fn add_header_map_value(&self, map_type: u32, key: &[u8], value: &[u8]) -> Status {
        Status::from_raw(unsafe {
            proxy_add_header_map_value(
                map_type,
                key.as_ptr(),
                key.len(),
                value.as_ptr(),
                value.len(),
            )
        })
    }

    fn replace_header_map_value(&self, map_type: u32, key: &[u8], value: &[u8]) -> Status {
        Status::from_raw(unsafe {
            proxy_replace_header_map_value(
                map_type,
                key.as_ptr(),
                key.len(),
                value.as_ptr(),
                value.len(),
            )
        })
    }

    fn remove_header_map_value(&self, map_type: u32, key: &[u8]) -> Status {
        Status::from_raw(unsafe {
            proxy_remove_header_map_value(map_type, key.as_ptr(), key.len())
        })
    }

    fn send_local_response(
        &self,
        status_code: u32,
        status_code_details: &[u8],
        body: &[u8],
        headers: &[u8],
        grpc_status: i32,
    ) -> Status {
        Status::from_raw(unsafe {
            proxy_send_local_response(
                status_code,
                status_code_details.as_ptr(),
                status_code_details.len(),
                body.as_ptr(),
                body.len(),
                headers.as_ptr(),
                headers.len(),
                grpc_status,
            )
        })
    }

    fn continue_stream(&self, stream_type: u32) -> Status {
        Status::from_raw(unsafe { proxy_continue_stream(stream_type) })
    }

    fn close_stream(&self, stream_type: u32) -> Status {
        Status::from_raw(unsafe { proxy_close_stream(stream_type) })
    }

    fn http_call(
        &self,
        upstream: &[u8],
        headers: &[u8],
        body: &[u8],
        trailers: &[u8],
        timeout_ms: u32,
        return_callout_id: &mut u32,
    ) -> Status {
        Status::from_raw(unsafe {
            proxy_http_call(
                upstream.as_ptr(),
                upstream.len(),
                headers.as_ptr(),
                headers.len(),
                body.as_ptr(),
                body.len(),
                trailers.as_ptr(),
                trailers.len(),
                timeout_ms,
                return_callout_id,
            )
        })
    }

    fn call_foreign_function(
        &self,
        name: &[u8],
        argument: &[u8],
        return_data: &mut Vec<u8>,
    ) -> Status {
        with_return_buffer(return_data, |data, size| unsafe {
            proxy_call_foreign_function(
                name.as_ptr(),
                name.len(),
                argument.as_ptr(),
                argument.len(),
                data,
                size,
            )
        })
    }

    fn get_shared_data(
        &self,
        key: &[u8],
        return_value: &mut Vec<u8>,
        return_cas: &mut u32,
    ) -> Status {
        with_return_buffer(return_value, |data, size| unsafe {
            proxy_get_shared_data(key.as_ptr(), key.len(), data, size, return_cas)
        })
    }

    fn set_shared_data(&self, key: &[u8], value: &[u8], cas: u32) -> Status {
        Status::from_raw(unsafe {
            proxy_set_shared_data(key.as_ptr(), key.len(), value.as_ptr(), value.len(), cas)
        })
    }

    fn register_shared_queue(&self, name: &[u8], return_id: &mut u32) -> Status {
        Status::from_raw(unsafe {
            proxy_register_shared_queue(name.as_ptr(), name.len(), return_id)
        })
    }

    fn resolve_shared_queue(&self, vm_id: &[u8], name: &[u8], return_id: &mut u32) -> Status {
        Status::from_raw(unsafe {
            proxy_resolve_shared_queue(
                vm_id.as_ptr(),
                vm_id.len(),
                name.as_ptr(),
                name.len(),
                return_id,
            )
        })
    }

    fn enqueue_shared_queue(&self, queue_id: u32, data: &[u8]) -> Status {
        Status::from_raw(unsafe { proxy_enqueue_shared_queue(queue_id, data.as_ptr(), data.len()) })
    }

    fn dequeue_shared_queue(&self, queue_id: u32, return_data: &mut Vec<u8>) -> Status {
        with_return_buffer(return_data, |data, size| unsafe {
            proxy_dequeue_shared_queue(queue_id, data, size)
        })
    }

    fn define_metric(&self, metric_type: u32, name: &[u8], return_id: &mut u32) -> Status {
        Status::from_raw(unsafe {
            proxy_define_metric(metric_type, name.as_ptr(), name.len(), return_id)
        })
    }

    fn increment_metric(&self, metric_id: u32, offset: i64) -> Status {
        Status::from_raw(unsafe { proxy_increment_metric(metric_id, offset) })
    }

    fn record_metric(&self, metric_id: u32, value: u64) -> Status {
        Status::from_raw(unsafe { proxy_record_metric(metric_id, value) })
    }

    fn get_metric(&self, metric_id: u32, return_value: &mut u64) -> Status {
        Status::from_raw(unsafe { proxy_get_metric(metric_id, return_value) })
    }

    fn get_property(&self, path: &[u8], return_data: &mut Vec<u8>) -> Status {
        with_return_buffer(return_data, |data, size| unsafe {
            proxy_get_property(path.as_ptr(), path.len(), data, size)
        })
    }

    fn set_property(&self, path: &[u8], value: &[u8]) -> Status {
        Status::from_raw(unsafe {
            proxy_set_property(path.as_ptr(), path.len(), value.as_ptr(), value.len())
        })
    }

    fn set_effective_context(&self, context_id: u32) -> Status {
        Status::from_raw(unsafe { proxy_set_effective_context(context_id) })
    }

    fn done(&self) -> Status {
        Status::from_raw(unsafe { proxy_done() })
    }
}
