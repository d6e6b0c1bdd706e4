//! HTTP stream filters driven through the emulator

use proxywasm_host::tracing_support::init_test_subscriber;
use proxywasm_host::{Action, EmulatorOptions, HostEmulator, LogLevel};
use proxywasm_sdk::prelude::*;
use serde::Deserialize;
use std::rc::Rc;

fn pairs(headers: &[(&str, &str)]) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Plugin whose streams are all built by one factory
struct Streams<F>(Rc<F>);

impl<F> VmContext for Streams<F>
where
    F: Fn() -> Box<dyn HttpContext> + 'static,
{
    fn new_plugin_context(&mut self, _context_id: u32) -> Box<dyn PluginContext> {
        Box::new(Streams(self.0.clone()))
    }
}

impl<F> PluginContext for Streams<F>
where
    F: Fn() -> Box<dyn HttpContext> + 'static,
{
    fn new_http_context(&mut self, _context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some((self.0)())
    }
}

fn streams<F>(factory: F) -> Streams<F>
where
    F: Fn() -> Box<dyn HttpContext> + 'static,
{
    Streams(Rc::new(factory))
}

// ============================================================
// Header mutation
// ============================================================

struct HeaderSetter;

impl HttpContext for HeaderSetter {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        http::set_http_request_header("test", "best").expect("Failed to set header");
        Action::Continue
    }

    fn on_http_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        http::remove_http_response_header("server").expect("Failed to remove header");
        http::add_http_response_header("x-filtered", "1").expect("Failed to add header");
        Action::Continue
    }

    fn on_http_response_trailers(&mut self, _num_trailers: usize) -> Action {
        let trailers = http::get_http_response_trailers().expect("Failed to read trailers");
        let _ = logging::log(LogLevel::Info, &format!("{} response trailers", trailers.len()));
        Action::Continue
    }

    fn on_log(&mut self) {
        let _ = logging::log(LogLevel::Info, "stream finished");
    }
}

#[test]
fn test_set_request_header() {
    init_test_subscriber();
    let emulator = HostEmulator::new(streams(|| Box::new(HeaderSetter)))
        .expect("Failed to start emulator");

    let id = emulator.initialize_http_context();
    assert_eq!(id, 2);

    let action = emulator.call_on_request_headers(id, &[("k", "v")], false);
    assert_eq!(action, Action::Continue);
    assert_eq!(
        emulator.get_current_request_headers(id).expect("Failed to read headers"),
        pairs(&[("k", "v"), ("test", "best")])
    );
}

#[test]
fn test_response_header_mutation() {
    let emulator = HostEmulator::new(streams(|| Box::new(HeaderSetter)))
        .expect("Failed to start emulator");
    let id = emulator.initialize_http_context();

    emulator.call_on_request_headers(id, &[(":path", "/")], true);
    let action =
        emulator.call_on_response_headers(id, &[(":status", "200"), ("server", "envoy")], false);
    assert_eq!(action, Action::Continue);
    assert_eq!(
        emulator.get_current_response_headers(id).expect("Failed to read headers"),
        pairs(&[(":status", "200"), ("x-filtered", "1")])
    );

    emulator.call_on_response_trailers(id, &[("grpc-status", "0"), ("grpc-message", "ok")]);
    emulator.complete_http_context(id);
    assert_eq!(
        emulator.logs(LogLevel::Info),
        vec!["2 response trailers".to_string(), "stream finished".to_string()]
    );
}

#[test]
fn test_unknown_stream_inspection() {
    let emulator = HostEmulator::new(streams(|| Box::new(HeaderSetter)))
        .expect("Failed to start emulator");
    assert!(emulator.get_current_request_headers(7).is_err());
}

// ============================================================
// JSON validation with local response
// ============================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidationConfig {
    required_keys: Vec<String>,
}

struct ValidatorVm;

impl VmContext for ValidatorVm {
    fn new_plugin_context(&mut self, _context_id: u32) -> Box<dyn PluginContext> {
        Box::new(Validator {
            required_keys: Rc::new(Vec::new()),
        })
    }
}

struct Validator {
    required_keys: Rc<Vec<String>>,
}

impl PluginContext for Validator {
    fn on_plugin_start(&mut self, _plugin_configuration_size: usize) -> bool {
        match plugin::plugin_configuration_json::<ValidationConfig>() {
            Ok(Some(config)) => {
                self.required_keys = Rc::new(config.required_keys);
                true
            }
            _ => false,
        }
    }

    fn new_http_context(&mut self, _context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(JsonBody {
            required_keys: self.required_keys.clone(),
        }))
    }
}

struct JsonBody {
    required_keys: Rc<Vec<String>>,
}

impl JsonBody {
    fn is_valid(&self, body: &[u8]) -> bool {
        match serde_json::from_slice::<serde_json::Value>(body) {
            Ok(serde_json::Value::Object(map)) => {
                self.required_keys.iter().all(|k| map.contains_key(k))
            }
            _ => false,
        }
    }
}

impl HttpContext for JsonBody {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        match http::get_http_request_header("content-type") {
            Ok(Some(content_type)) if content_type == "application/json" => Action::Continue,
            _ => {
                http::send_http_response(
                    403,
                    &[("powered-by", "proxy-wasm")],
                    Some(b"content-type must be provided".as_slice()),
                    None,
                )
                .expect("Failed to send response");
                Action::Pause
            }
        }
    }

    fn on_http_request_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if !end_of_stream {
            return Action::Pause;
        }
        let body = http::get_http_request_body(0, body_size)
            .expect("Failed to read body")
            .unwrap_or_default();
        if self.is_valid(&body) {
            return Action::Continue;
        }
        http::send_http_response::<&str, &str>(403, &[], Some(b"invalid payload".as_slice()), None)
            .expect("Failed to send response");
        Action::Pause
    }

    fn on_log(&mut self) {
        let _ = logging::log(LogLevel::Info, "logged after local response");
    }
}

fn validator() -> HostEmulator {
    HostEmulator::with_options(
        ValidatorVm,
        EmulatorOptions::new().with_plugin_configuration(r#"{"requiredKeys":["my_key"]}"#),
    )
    .expect("Failed to start emulator")
}

#[test]
fn test_invalid_json_gets_local_response() {
    let emulator = validator();
    let id = emulator.initialize_http_context();

    let action =
        emulator.call_on_request_headers(id, &[("content-type", "application/json")], false);
    assert_eq!(action, Action::Continue);

    let action = emulator.call_on_request_body(id, b"invalid_payload", true);
    assert_eq!(action, Action::Pause);

    let response = emulator
        .get_sent_local_response(id)
        .expect("Failed to inspect stream")
        .expect("local response should be sent");
    assert_eq!(response.status_code, 403);
    assert_eq!(response.body, b"invalid payload".to_vec());
    assert_eq!(response.grpc_status, None);

    // the stream still receives on_log and on_delete
    emulator.complete_http_context(id);
    assert_eq!(emulator.logs(LogLevel::Info), vec!["logged after local response".to_string()]);
}

#[test]
fn test_valid_json_passes() {
    let emulator = validator();
    let id = emulator.initialize_http_context();

    emulator.call_on_request_headers(id, &[("content-type", "application/json")], false);
    assert_eq!(emulator.call_on_request_body(id, br#"{"my_key":"#, false), Action::Pause);
    assert_eq!(emulator.call_on_request_body(id, br#""value"}"#, true), Action::Continue);

    assert_eq!(
        emulator.get_current_request_body(id).expect("Failed to read body"),
        br#"{"my_key":"value"}"#.to_vec()
    );
    assert!(emulator
        .get_sent_local_response(id)
        .expect("Failed to inspect stream")
        .is_none());
}

#[test]
fn test_missing_content_type_rejected() {
    let emulator = validator();
    let id = emulator.initialize_http_context();

    assert_eq!(emulator.call_on_request_headers(id, &[(":path", "/")], false), Action::Pause);
    let response = emulator
        .get_sent_local_response(id)
        .expect("Failed to inspect stream")
        .expect("local response should be sent");
    assert_eq!(response.headers, pairs(&[("powered-by", "proxy-wasm")]));
}

#[test]
fn test_missing_configuration_rejects_plugin() {
    let result = HostEmulator::new(ValidatorVm);
    assert!(matches!(result, Err(proxywasm_host::EmulatorError::PluginStartRejected)));
}

// ============================================================
// Body buffering and replacement
// ============================================================

struct BodyRewriter;

const REPLACEMENT: &[u8] = b"replaced body";

impl HttpContext for BodyRewriter {
    fn on_http_request_body(&mut self, _body_size: usize, end_of_stream: bool) -> Action {
        if !end_of_stream {
            return Action::Pause;
        }
        http::replace_http_request_body(REPLACEMENT).expect("Failed to replace body");
        let body = http::get_http_request_body(0, REPLACEMENT.len())
            .expect("Failed to read body")
            .unwrap_or_default();
        let _ = logging::log(LogLevel::Info, &String::from_utf8_lossy(&body));
        Action::Continue
    }

    fn on_http_response_body(&mut self, _body_size: usize, end_of_stream: bool) -> Action {
        if end_of_stream {
            http::prepend_http_response_body(b"<").expect("Failed to prepend");
            http::append_http_response_body(b">").expect("Failed to append");
        }
        Action::Continue
    }

    fn on_http_request_trailers(&mut self, _num_trailers: usize) -> Action {
        if http::get_http_request_trailer("x-abort").ok().flatten().is_some() {
            http::close_http_stream().expect("Failed to close stream");
        }
        Action::Continue
    }
}

#[test]
fn test_pause_until_end_of_stream_then_replace() {
    let emulator = HostEmulator::new(streams(|| Box::new(BodyRewriter)))
        .expect("Failed to start emulator");
    let id = emulator.initialize_http_context();

    emulator.call_on_request_headers(id, &[("content-length", "3")], false);
    assert_eq!(emulator.call_on_request_body(id, b"AAA", false), Action::Pause);
    assert_eq!(emulator.get_current_request_body(id).expect("body"), b"AAA".to_vec());

    assert_eq!(emulator.call_on_request_body(id, b"", true), Action::Continue);
    assert_eq!(emulator.get_current_request_body(id).expect("body"), REPLACEMENT.to_vec());
    assert_eq!(emulator.logs(LogLevel::Info), vec!["replaced body".to_string()]);
}

#[test]
fn test_response_body_prepend_and_append() {
    let emulator = HostEmulator::new(streams(|| Box::new(BodyRewriter)))
        .expect("Failed to start emulator");
    let id = emulator.initialize_http_context();

    emulator.call_on_response_headers(id, &[(":status", "200")], false);
    emulator.call_on_response_body(id, b"first", false);
    // the previous hook continued, so the next chunk replaces the buffer
    emulator.call_on_response_body(id, b"body", true);
    assert_eq!(emulator.get_current_response_body(id).expect("body"), b"<body>".to_vec());
}

#[test]
fn test_close_stream_from_trailers() {
    let emulator = HostEmulator::new(streams(|| Box::new(BodyRewriter)))
        .expect("Failed to start emulator");
    let id = emulator.initialize_http_context();

    emulator.call_on_request_trailers(id, &[("x-abort", "1")]);
    assert!(emulator.is_http_stream_closed(id).expect("Failed to inspect stream"));
    assert_eq!(
        emulator.get_current_request_trailers(id).expect("trailers"),
        pairs(&[("x-abort", "1")])
    );
}
