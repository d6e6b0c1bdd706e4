//! proxywasm-sdk: SDK for writing Proxy-Wasm filters in Rust
//!
//! A filter implements the context traits and registers its VM context with
//! [`main!`]. The SDK exports the `proxy_on_*` entry points, routes every
//! host call to the right context object, and wraps the host imports in
//! typed functions grouped by concern.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use proxywasm_sdk::prelude::*;
//!
//! struct Root;
//! struct AddHeader;
//!
//! impl VmContext for Root {
//!     fn new_plugin_context(&mut self, _context_id: u32) -> Box<dyn PluginContext> {
//!         Box::new(Root)
//!     }
//! }
//!
//! impl PluginContext for Root {
//!     fn new_http_context(&mut self, _context_id: u32) -> Option<Box<dyn HttpContext>> {
//!         Some(Box::new(AddHeader))
//!     }
//! }
//!
//! impl HttpContext for AddHeader {
//!     fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
//!         let _ = http::set_http_request_header("test", "best");
//!         Action::Continue
//!     }
//! }
//!
//! proxywasm_sdk::main!(Root);
//! ```
//!
//! ## Modules
//!
//! | Module | Concern |
//! |--------|---------|
//! | [`http`] | request/response headers, bodies, trailers, local responses |
//! | [`tcp`] | downstream/upstream data |
//! | [`callout`] | out-of-band HTTP calls |
//! | [`shared_data`], [`queue`] | state shared between plugins |
//! | [`metrics`] | counters, gauges, histograms |
//! | [`property`] | host attributes |
//! | [`plugin`] | configuration, tick, clock, effective context |
//! | [`logging`] | host log and `tracing` integration |
//! | [`hostcall`] | raw import surface and host resolver |

pub mod buffer;
pub mod callout;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod exports;
pub mod hostcall;
pub mod http;
pub mod logging;
pub mod memory;
pub mod metrics;
pub mod plugin;
pub mod property;
pub mod queue;
pub mod shared_data;
pub mod tcp;

pub use context::{
    DefaultPluginContext, DefaultVmContext, HttpContext, PluginContext, TcpContext, VmContext,
};
pub use dispatcher::set_vm_context;
pub use error::{Error, Result};
pub use proxywasm_api;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::context::{HttpContext, PluginContext, TcpContext, VmContext};
    pub use crate::metrics::{Counter, Gauge, Histogram};
    pub use crate::{callout, http, logging, plugin, property, queue, shared_data, tcp};
    pub use crate::{Error, Result};
    pub use proxywasm_api::{Action, HostError, LogLevel, PeerType, Status};
}

/// Register the VM context and generate the module initializer
///
/// On `wasm32` this emits `_initialize`, which the host runs before any
/// other export: it installs the panic hook and the host log layer, then
/// registers the VM context built by `$vm`.
///
/// ```rust,ignore
/// proxywasm_sdk::main!(MyVm::default());
/// ```
#[macro_export]
macro_rules! main {
    ($vm:expr) => {
        #[cfg(target_arch = "wasm32")]
        #[no_mangle]
        pub extern "C" fn _initialize() {
            $crate::logging::set_panic_hook();
            $crate::logging::init();
            $crate::set_vm_context(::std::boxed::Box::new($vm));
        }
    };
}
