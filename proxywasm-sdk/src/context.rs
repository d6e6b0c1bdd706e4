//! User-facing capability traits
//!
//! A module is described by four kinds of objects:
//!
//! ```text
//! VmContext                 one per module instance
//!  └─ PluginContext         one per plugin configuration (root context)
//!      ├─ HttpContext       one per HTTP request/response stream
//!      └─ TcpContext        one per TCP connection
//! ```
//!
//! Every hook has a default, so an implementation only overrides what it
//! needs. Traffic hooks default to [`Action::Continue`], lifecycle hooks to
//! success, and factories to "no stream context of this kind".

use proxywasm_api::{Action, PeerType};

/// Singleton that starts the VM and mints plugin contexts
pub trait VmContext {
    /// Called once when the VM starts; `false` fails the start
    fn on_vm_start(&mut self, _vm_configuration_size: usize) -> bool {
        true
    }

    /// Create the plugin context for a new root context id
    fn new_plugin_context(&mut self, _context_id: u32) -> Box<dyn PluginContext> {
        Box::new(DefaultPluginContext)
    }
}

/// Per-configuration object; parent of streams and owner of callouts
pub trait PluginContext {
    /// Called when the plugin configuration is delivered; `false` rejects it
    fn on_plugin_start(&mut self, _plugin_configuration_size: usize) -> bool {
        true
    }

    /// Called when the host wants to shut the plugin down
    ///
    /// Returning `false` defers teardown until the plugin calls
    /// [`crate::plugin::done`].
    fn on_plugin_done(&mut self) -> bool {
        true
    }

    /// Called every tick period set with [`crate::plugin::set_tick_period`]
    fn on_tick(&mut self) {}

    /// Called when a shared queue registered by this plugin has data
    fn on_queue_ready(&mut self, _queue_id: u32) {}

    /// Create the context for a new HTTP stream, if this plugin filters HTTP
    fn new_http_context(&mut self, _context_id: u32) -> Option<Box<dyn HttpContext>> {
        None
    }

    /// Create the context for a new TCP connection, if this plugin filters TCP
    fn new_tcp_context(&mut self, _context_id: u32) -> Option<Box<dyn TcpContext>> {
        None
    }
}

/// Hooks for a single HTTP request/response exchange
pub trait HttpContext {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_http_request_body(&mut self, _body_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_http_request_trailers(&mut self, _num_trailers: usize) -> Action {
        Action::Continue
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_http_response_body(&mut self, _body_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_http_response_trailers(&mut self, _num_trailers: usize) -> Action {
        Action::Continue
    }

    /// The host is done with the stream
    fn on_http_stream_done(&mut self) {}

    /// Final per-stream hook, after which only deletion follows
    fn on_log(&mut self) {}
}

/// Hooks for a single TCP connection
pub trait TcpContext {
    fn on_new_connection(&mut self) -> Action {
        Action::Continue
    }

    fn on_downstream_data(&mut self, _data_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_downstream_close(&mut self, _peer: PeerType) {}

    fn on_upstream_data(&mut self, _data_size: usize, _end_of_stream: bool) -> Action {
        Action::Continue
    }

    fn on_upstream_close(&mut self, _peer: PeerType) {}

    /// The host is done with the connection
    fn on_stream_done(&mut self) {}

    /// Final per-connection hook
    fn on_log(&mut self) {}
}

/// VM context with every hook left at its default
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultVmContext;

impl VmContext for DefaultVmContext {}

/// Plugin context with every hook left at its default
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPluginContext;

impl PluginContext for DefaultPluginContext {}

#[cfg(test)]
mod tests {
    use super::*;

    struct Passthrough;

    impl HttpContext for Passthrough {}
    impl TcpContext for Passthrough {}

    #[test]
    fn test_default_hooks_continue() {
        let mut http = Passthrough;
        assert_eq!(http.on_http_request_headers(3, false), Action::Continue);
        assert_eq!(http.on_http_response_body(10, true), Action::Continue);
        assert_eq!(TcpContext::on_new_connection(&mut Passthrough), Action::Continue);
    }

    #[test]
    fn test_default_factories() {
        let mut vm = DefaultVmContext;
        assert!(vm.on_vm_start(0));

        let mut plugin = vm.new_plugin_context(1);
        assert!(plugin.on_plugin_start(0));
        assert!(plugin.on_plugin_done());
        assert!(plugin.new_http_context(2).is_none());
        assert!(plugin.new_tcp_context(2).is_none());
    }
}
