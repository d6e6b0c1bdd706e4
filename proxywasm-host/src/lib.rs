//! proxywasm-host: In-process Proxy-Wasm host for testing filters
//!
//! The emulator implements the host side of the ABI without a WebAssembly
//! engine: it installs itself as the module's host, keeps the state a proxy
//! would keep (per-stream headers and bodies, shared data, queues, metrics,
//! properties), and calls the module's `proxy_on_*` exports directly.
//!
//! ```rust,ignore
//! let emulator = HostEmulator::new(MyVm)?;
//! let id = emulator.initialize_http_context();
//! assert_eq!(emulator.call_on_request_headers(id, &[("k", "v")], false), Action::Continue);
//! emulator.complete_http_context(id);
//! ```

pub mod emulator;
pub mod error;
mod host;
pub mod state;
pub mod tracing_support;

pub use emulator::{EmulatorOptions, HostEmulator};
pub use error::EmulatorError;
pub use state::{CalloutAttribute, LocalResponse, PLUGIN_CONTEXT_ID};
pub use proxywasm_api::{Action, LogLevel, PeerType};
