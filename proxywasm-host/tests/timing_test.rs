//! Export timing logs, enabled with the `timing` feature
#![cfg(feature = "timing")]

use proxywasm_host::{Action, HostEmulator, LogLevel};
use proxywasm_sdk::prelude::*;

struct StreamVm;

impl VmContext for StreamVm {
    fn new_plugin_context(&mut self, _context_id: u32) -> Box<dyn PluginContext> {
        Box::new(StreamPlugin)
    }
}

struct StreamPlugin;

impl PluginContext for StreamPlugin {
    fn new_http_context(&mut self, _context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(HeaderReader))
    }
}

struct HeaderReader;

impl HttpContext for HeaderReader {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        let path = http::get_http_request_header(":path").expect("Failed to read header");
        assert_eq!(path.as_deref(), Some("/"));
        Action::Continue
    }
}

#[test]
fn test_exports_log_elapsed_time() {
    let emulator = HostEmulator::new(StreamVm).expect("Failed to start emulator");
    let id = emulator.initialize_http_context();
    assert_eq!(emulator.call_on_request_headers(id, &[(":path", "/")], true), Action::Continue);

    let lines = emulator.logs(LogLevel::Debug);
    for export in [
        "proxy_on_context_create",
        "proxy_on_vm_start",
        "proxy_on_configure",
        "proxy_on_request_headers",
    ] {
        let line = lines
            .iter()
            .find(|line| line.starts_with(&format!("{export} took ")))
            .unwrap_or_else(|| panic!("no timing line for {export}: {lines:?}"));
        assert!(!line.ends_with(" 0ns"), "{line}");
    }
}
