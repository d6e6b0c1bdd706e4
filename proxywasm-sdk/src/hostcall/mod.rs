//! Raw host import surface
//!
//! [`ProxyHost`] mirrors the Proxy-Wasm v0.2.1 import table one method per
//! import. Selectors travel as raw integers, composite inputs as byte slices
//! (the `(pointer, length)` pairs of the ABI) and outputs through return
//! slots that the host fills. Every method reports a [`Status`].
//!
//! The active host is resolved per module instance:
//!
//! - on `wasm32` the default is [`wasm::WasmHost`], which links the imports
//!   straight to the proxy;
//! - anywhere else nothing is linked until a host (normally the emulator in
//!   `proxywasm-host`) is installed with [`install`].
//!
//! Every method defaults to [`Status::Unimplemented`], so a partial host only
//! overrides what it supports.

#[cfg(target_arch = "wasm32")]
pub mod wasm;

use proxywasm_api::Status;
use std::cell::RefCell;
use std::rc::Rc;

/// The host functions a guest module imports
#[allow(unused_variables)]
pub trait ProxyHost {
    // ------------------------------------------------------------
    // Logging and time
    // ------------------------------------------------------------

    fn log(&self, level: u32, message: &[u8]) -> Status {
        Status::Unimplemented
    }

    fn get_log_level(&self, return_level: &mut u32) -> Status {
        Status::Unimplemented
    }

    fn get_current_time_nanoseconds(&self, return_time: &mut u64) -> Status {
        Status::Unimplemented
    }

    fn set_tick_period_milliseconds(&self, period: u32) -> Status {
        Status::Unimplemented
    }

    // ------------------------------------------------------------
    // Buffers
    // ------------------------------------------------------------

    /// Copy `[start, start + max_size)` of a buffer into `return_data`
    fn get_buffer_bytes(
        &self,
        buffer_type: u32,
        start: usize,
        max_size: usize,
        return_data: &mut Vec<u8>,
    ) -> Status {
        Status::Unimplemented
    }

    /// Write into a buffer; `(start, max_size)` encodes append/prepend/replace
    fn set_buffer_bytes(
        &self,
        buffer_type: u32,
        start: usize,
        max_size: usize,
        data: &[u8],
    ) -> Status {
        Status::Unimplemented
    }

    // ------------------------------------------------------------
    // Header maps
    // ------------------------------------------------------------

    fn get_header_map_pairs(&self, map_type: u32, return_data: &mut Vec<u8>) -> Status {
        Status::Unimplemented
    }

    fn set_header_map_pairs(&self, map_type: u32, data: &[u8]) -> Status {
        Status::Unimplemented
    }

    fn get_header_map_value(
        &self,
        map_type: u32,
        key: &[u8],
        return_value: &mut Vec<u8>,
    ) -> Status {
        Status::Unimplemented
    }

    fn add_header_map_value(&self, map_type: u32, key: &[u8], value: &[u8]) -> Status {
        Status::Unimplemented
    }

    fn replace_header_map_value(&self, map_type: u32, key: &[u8], value: &[u8]) -> Status {
        Status::Unimplemented
    }

    fn remove_header_map_value(&self, map_type: u32, key: &[u8]) -> Status {
        Status::Unimplemented
    }

    // ------------------------------------------------------------
    // Stream control
    // ------------------------------------------------------------

    fn send_local_response(
        &self,
        status_code: u32,
        status_code_details: &[u8],
        body: &[u8],
        headers: &[u8],
        grpc_status: i32,
    ) -> Status {
        Status::Unimplemented
    }

    fn continue_stream(&self, stream_type: u32) -> Status {
        Status::Unimplemented
    }

    fn close_stream(&self, stream_type: u32) -> Status {
        Status::Unimplemented
    }

    // ------------------------------------------------------------
    // Out-of-band calls
    // ------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    fn http_call(
        &self,
        upstream: &[u8],
        headers: &[u8],
        body: &[u8],
        trailers: &[u8],
        timeout_ms: u32,
        return_callout_id: &mut u32,
    ) -> Status {
        Status::Unimplemented
    }

    fn call_foreign_function(
        &self,
        name: &[u8],
        argument: &[u8],
        return_data: &mut Vec<u8>,
    ) -> Status {
        Status::Unimplemented
    }

    // ------------------------------------------------------------
    // Shared data and queues
    // ------------------------------------------------------------

    fn get_shared_data(
        &self,
        key: &[u8],
        return_value: &mut Vec<u8>,
        return_cas: &mut u32,
    ) -> Status {
        Status::Unimplemented
    }

    fn set_shared_data(&self, key: &[u8], value: &[u8], cas: u32) -> Status {
        Status::Unimplemented
    }

    fn register_shared_queue(&self, name: &[u8], return_id: &mut u32) -> Status {
        Status::Unimplemented
    }

    fn resolve_shared_queue(&self, vm_id: &[u8], name: &[u8], return_id: &mut u32) -> Status {
        Status::Unimplemented
    }

    fn enqueue_shared_queue(&self, queue_id: u32, data: &[u8]) -> Status {
        Status::Unimplemented
    }

    fn dequeue_shared_queue(&self, queue_id: u32, return_data: &mut Vec<u8>) -> Status {
        Status::Unimplemented
    }

    // ------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------

    fn define_metric(&self, metric_type: u32, name: &[u8], return_id: &mut u32) -> Status {
        Status::Unimplemented
    }

    fn increment_metric(&self, metric_id: u32, offset: i64) -> Status {
        Status::Unimplemented
    }

    fn record_metric(&self, metric_id: u32, value: u64) -> Status {
        Status::Unimplemented
    }

    fn get_metric(&self, metric_id: u32, return_value: &mut u64) -> Status {
        Status::Unimplemented
    }

    // ------------------------------------------------------------
    // Properties and context
    // ------------------------------------------------------------

    fn get_property(&self, path: &[u8], return_data: &mut Vec<u8>) -> Status {
        Status::Unimplemented
    }

    fn set_property(&self, path: &[u8], value: &[u8]) -> Status {
        Status::Unimplemented
    }

    fn set_effective_context(&self, context_id: u32) -> Status {
        Status::Unimplemented
    }

    fn done(&self) -> Status {
        Status::Unimplemented
    }
}

/// Stand-in used when no host is linked or installed
struct Detached;

impl ProxyHost for Detached {}

thread_local! {
    static HOST: RefCell<Option<Rc<dyn ProxyHost>>> = RefCell::new(default_host());
}

#[cfg(target_arch = "wasm32")]
fn default_host() -> Option<Rc<dyn ProxyHost>> {
    Some(Rc::new(wasm::WasmHost))
}

#[cfg(not(target_arch = "wasm32"))]
fn default_host() -> Option<Rc<dyn ProxyHost>> {
    None
}

/// Route all host calls from this module instance to `host`
///
/// Returns the previously installed host.
pub fn install(host: Rc<dyn ProxyHost>) -> Option<Rc<dyn ProxyHost>> {
    HOST.with(|slot| slot.borrow_mut().replace(host))
}

/// Remove the installed host; later calls answer `unimplemented`
pub fn uninstall() -> Option<Rc<dyn ProxyHost>> {
    HOST.with(|slot| slot.borrow_mut().take())
}

pub fn is_installed() -> bool {
    HOST.with(|slot| slot.borrow().is_some())
}

/// Current host
///
/// The slot is released before the handle is returned, so a host may call
/// back into the module (and the module into the host) while a call is in
/// progress.
pub(crate) fn host() -> Rc<dyn ProxyHost> {
    HOST.with(|slot| slot.borrow().clone())
        .unwrap_or_else(|| Rc::new(Detached))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedClock;

    impl ProxyHost for FixedClock {
        fn get_current_time_nanoseconds(&self, return_time: &mut u64) -> Status {
            *return_time = 42;
            Status::Ok
        }
    }

    #[test]
    fn test_detached_host_is_unimplemented() {
        uninstall();
        let mut level = 0;
        assert_eq!(host().get_log_level(&mut level), Status::Unimplemented);
        assert!(!is_installed());
    }

    #[test]
    fn test_install_and_uninstall() {
        assert!(install(Rc::new(FixedClock)).is_none());
        assert!(is_installed());

        let mut now = 0;
        assert_eq!(host().get_current_time_nanoseconds(&mut now), Status::Ok);
        assert_eq!(now, 42);

        // methods the host does not override fall back to the default
        assert_eq!(host().done(), Status::Unimplemented);

        assert!(uninstall().is_some());
        assert!(!is_installed());
    }
}
