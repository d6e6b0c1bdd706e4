//! Plugin lifecycle, configuration and host services

use proxywasm_host::{Action, EmulatorError, EmulatorOptions, HostEmulator, LogLevel};
use proxywasm_sdk::prelude::*;
use proxywasm_sdk::proxywasm_api::codec;
use serde::Deserialize;
use std::time::{Duration, UNIX_EPOCH};

// ============================================================
// VM and plugin start
// ============================================================

/// Requires a VM configuration of exactly `vm-config`
struct StrictVm;

impl VmContext for StrictVm {
    fn on_vm_start(&mut self, _vm_configuration_size: usize) -> bool {
        matches!(plugin::vm_configuration(), Ok(Some(config)) if config == b"vm-config")
    }
}

#[test]
fn test_vm_configuration() {
    let emulator = HostEmulator::with_options(
        StrictVm,
        EmulatorOptions::new().with_vm_configuration("vm-config"),
    )
    .expect("Failed to start emulator");
    assert_eq!(emulator.plugin_context_id(), 1);
    drop(emulator);

    let rejected = HostEmulator::new(StrictVm);
    assert!(matches!(rejected, Err(EmulatorError::VmStartRejected)));
}

// ============================================================
// Deferred shutdown
// ============================================================

struct DrainingVm;

impl VmContext for DrainingVm {
    fn new_plugin_context(&mut self, _context_id: u32) -> Box<dyn PluginContext> {
        Box::new(Draining { draining: false })
    }
}

/// Finishes shutting down on the tick after `on_plugin_done`
struct Draining {
    draining: bool,
}

impl PluginContext for Draining {
    fn on_plugin_start(&mut self, _plugin_configuration_size: usize) -> bool {
        plugin::set_tick_period(Duration::from_millis(250)).is_ok()
    }

    fn on_plugin_done(&mut self) -> bool {
        self.draining = true;
        false
    }

    fn on_tick(&mut self) {
        if self.draining {
            plugin::done().expect("Failed to report done");
        }
    }
}

#[test]
fn test_deferred_plugin_done() {
    let emulator = HostEmulator::new(DrainingVm).expect("Failed to start emulator");
    assert_eq!(emulator.get_tick_period(), Duration::from_millis(250));

    emulator.tick();
    assert!(!emulator.is_plugin_done());

    assert!(!emulator.call_on_plugin_done());
    assert!(!emulator.is_plugin_done());

    emulator.tick();
    assert!(emulator.is_plugin_done());
    emulator.delete_plugin();
    assert!(!proxywasm_sdk::dispatcher::context_exists(1));
}

#[test]
fn test_default_plugin_done_is_immediate() {
    let emulator =
        HostEmulator::new(proxywasm_sdk::DefaultVmContext).expect("Failed to start emulator");
    assert!(emulator.call_on_plugin_done());
}

// ============================================================
// Properties, foreign functions, metrics
// ============================================================

struct ServicesVm;

impl VmContext for ServicesVm {
    fn new_plugin_context(&mut self, _context_id: u32) -> Box<dyn PluginContext> {
        Box::new(ServicesPlugin { metrics: None })
    }
}

#[derive(Clone, Copy)]
struct RequestMetrics {
    requests: Counter,
    body_size: Histogram,
}

struct ServicesPlugin {
    metrics: Option<RequestMetrics>,
}

impl PluginContext for ServicesPlugin {
    fn on_plugin_start(&mut self, _plugin_configuration_size: usize) -> bool {
        let requests = Counter::define("requests_total");
        let body_size = Histogram::define("request_body_bytes");
        match (requests, body_size) {
            (Ok(requests), Ok(body_size)) => {
                self.metrics = Some(RequestMetrics { requests, body_size });
                true
            }
            _ => false,
        }
    }

    fn new_http_context(&mut self, _context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(Services { metrics: self.metrics? }))
    }
}

struct Services {
    metrics: RequestMetrics,
}

fn info(message: String) {
    let _ = logging::log(LogLevel::Info, &message);
}

impl HttpContext for Services {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        self.metrics.requests.increment(1).expect("Failed to increment");

        let node = property::get_property_string(&["node", "id"]).expect("Failed to read node id");
        let size = property::get_property_u64(&["request", "size"]).expect("Failed to read size");
        let missing =
            property::get_property(&["request", "missing"]).expect("Failed to read property");
        info(format!("node={node:?} size={size:?} missing={missing:?}"));

        let zones = property::get_property_string_slice(&["node", "zones"])
            .expect("Failed to read zones");
        info(format!("zones={zones:?}"));

        let bad = property::get_property_bool(&["request", "size"]);
        info(format!("decode error={}", matches!(bad, Err(Error::Decode(_)))));

        property::set_property(&["filter", "state"], b"seen").expect("Failed to set property");

        let reversed =
            plugin::call_foreign_function("reverse", b"abc").expect("Failed to call function");
        let unknown =
            plugin::call_foreign_function("unknown", b"abc").expect("Failed to call function");
        info(format!("reverse={reversed:?} unknown={unknown:?}"));

        let level = logging::log_level().expect("Failed to read log level");
        info(format!("level={level:?}"));
        Action::Continue
    }

    fn on_http_request_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        if end_of_stream {
            self.metrics
                .body_size
                .record(body_size as u64)
                .expect("Failed to record");
        }
        Action::Continue
    }
}

fn services() -> HostEmulator {
    let emulator = HostEmulator::with_options(
        ServicesVm,
        EmulatorOptions::new()
            .with_property(&["node", "id"], "node-1")
            .with_property(&["node", "zones"], codec::serialize_string_slice(&["a", "b"]))
            .with_log_level(LogLevel::Warn),
    )
    .expect("Failed to start emulator");
    emulator.set_property(&["request", "size"], codec::serialize_u64(42));
    emulator.register_foreign_function("reverse", |argument| {
        argument.iter().rev().copied().collect()
    });
    emulator
}

#[test]
fn test_properties_and_foreign_functions() {
    let emulator = services();
    let id = emulator.initialize_http_context();
    emulator.call_on_request_headers(id, &[(":path", "/")], false);

    assert_eq!(
        emulator.logs(LogLevel::Info),
        vec![
            r#"node=Some("node-1") size=Some(42) missing=None"#.to_string(),
            r#"zones=Some(["a", "b"])"#.to_string(),
            "decode error=true".to_string(),
            "reverse=Some([99, 98, 97]) unknown=None".to_string(),
            "level=Warn".to_string(),
        ]
    );
    assert_eq!(emulator.get_property(&["filter", "state"]), Some(b"seen".to_vec()));
}

#[test]
fn test_request_metrics() {
    let emulator = services();
    let bodies: [&[u8]; 3] = [b"a", b"abc", b"abcdef"];
    for body in bodies {
        let id = emulator.initialize_http_context();
        emulator.call_on_request_headers(id, &[(":path", "/")], false);
        emulator.call_on_request_body(id, body, true);
        emulator.complete_http_context(id);
    }

    assert_eq!(emulator.get_counter_metric("requests_total").expect("counter"), 3);
    assert_eq!(
        emulator.get_histogram_metric("request_body_bytes").expect("histogram"),
        vec![1, 3, 6]
    );
    assert!(matches!(
        emulator.get_gauge_metric("requests_total"),
        Err(EmulatorError::WrongMetricKind { .. })
    ));
    assert!(matches!(
        emulator.get_counter_metric("nope"),
        Err(EmulatorError::UnknownMetric(name)) if name == "nope"
    ));
}

#[test]
fn test_metric_handles_from_test_body() {
    let _emulator = HostEmulator::new(ServicesVm).expect("Failed to start emulator");

    // defining an existing name returns the same metric
    let counter = Counter::define("requests_total").expect("Failed to define");
    counter.increment(5).expect("Failed to increment");
    assert_eq!(counter.value().expect("Failed to read"), 5);

    let gauge = Gauge::define("inflight").expect("Failed to define");
    gauge.record(10).expect("Failed to record");
    gauge.add(-3).expect("Failed to add");
    assert_eq!(gauge.value().expect("Failed to read"), 7);

    assert!(Histogram::define("requests_total").is_err());
}

#[test]
fn test_gauge_goes_negative_counter_does_not() {
    let emulator = HostEmulator::new(ServicesVm).expect("Failed to start emulator");

    let gauge = Gauge::define("queue_delta").expect("Failed to define");
    gauge.add(2).expect("Failed to add");
    gauge.add(-3).expect("Failed to add");
    assert_eq!(gauge.value().expect("Failed to read"), -1);
    assert_eq!(emulator.get_gauge_metric("queue_delta").expect("gauge"), -1);

    gauge.record(-40).expect("Failed to record");
    assert_eq!(emulator.get_gauge_metric("queue_delta").expect("gauge"), -40);

    let counter = Counter::define("requests_total").expect("Failed to define");
    let err = counter.increment(u64::MAX).expect_err("overflowing delta should fail");
    assert_eq!(err.host_kind(), Some(proxywasm_sdk::proxywasm_api::ErrorKind::CallerError));
    assert_eq!(counter.value().expect("Failed to read"), 0);
}

// ============================================================
// Typed configuration
// ============================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GateConfig {
    min_level: LogLevel,
    on_missing_header: Action,
}

struct GateVm;

impl VmContext for GateVm {
    fn new_plugin_context(&mut self, _context_id: u32) -> Box<dyn PluginContext> {
        Box::new(GatePlugin { config: None })
    }
}

struct GatePlugin {
    config: Option<(LogLevel, Action)>,
}

impl PluginContext for GatePlugin {
    fn on_plugin_start(&mut self, _plugin_configuration_size: usize) -> bool {
        match plugin::plugin_configuration_json::<GateConfig>() {
            Ok(Some(config)) => {
                self.config = Some((config.min_level, config.on_missing_header));
                true
            }
            _ => false,
        }
    }

    fn new_http_context(&mut self, _context_id: u32) -> Option<Box<dyn HttpContext>> {
        let (level, on_missing) = self.config?;
        Some(Box::new(Gate { level, on_missing }))
    }
}

/// Holds requests without `x-id` and reports them at the configured level
struct Gate {
    level: LogLevel,
    on_missing: Action,
}

impl HttpContext for Gate {
    fn on_http_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Action {
        match http::get_http_request_header("x-id").expect("Failed to read header") {
            Some(_) => Action::Continue,
            None => {
                let _ = logging::log(self.level, "missing x-id");
                self.on_missing
            }
        }
    }
}

#[test]
fn test_levels_and_actions_from_json_configuration() {
    let emulator = HostEmulator::with_options(
        GateVm,
        EmulatorOptions::new()
            .with_plugin_configuration(r#"{"minLevel":"warn","onMissingHeader":"pause"}"#),
    )
    .expect("Failed to start emulator");

    let id = emulator.initialize_http_context();
    assert_eq!(emulator.call_on_request_headers(id, &[("x-id", "7")], true), Action::Continue);

    let id = emulator.initialize_http_context();
    assert_eq!(emulator.call_on_request_headers(id, &[(":path", "/")], true), Action::Pause);
    assert_eq!(emulator.logs(LogLevel::Warn), vec!["missing x-id".to_string()]);
}

#[test]
fn test_unknown_level_in_configuration_rejects_plugin() {
    let rejected = HostEmulator::with_options(
        GateVm,
        EmulatorOptions::new()
            .with_plugin_configuration(r#"{"minLevel":"loud","onMissingHeader":"pause"}"#),
    );
    assert!(matches!(rejected, Err(EmulatorError::PluginStartRejected)));
}

// ============================================================
// Clock and effective context
// ============================================================

#[test]
fn test_clock_is_monotonic() {
    let _emulator =
        HostEmulator::new(proxywasm_sdk::DefaultVmContext).expect("Failed to start emulator");
    let first = plugin::current_time().expect("Failed to read time");
    let second = plugin::current_time().expect("Failed to read time");
    assert!(second > first);
    assert!(first > UNIX_EPOCH);
}

#[test]
fn test_set_effective_context() {
    let emulator = HostEmulator::new(ServicesVm).expect("Failed to start emulator");
    let id = emulator.initialize_http_context();
    emulator.call_on_request_headers(id, &[(":path", "/a")], false);

    plugin::set_effective_context(id).expect("Failed to switch context");
    assert_eq!(emulator.active_context_id(), id);
    http::set_http_request_header("x-from-test", "1").expect("Failed to set header");
    assert!(emulator
        .get_current_request_headers(id)
        .expect("Failed to read headers")
        .contains(&("x-from-test".to_string(), "1".to_string())));

    let err = plugin::set_effective_context(99).expect_err("unknown context should fail");
    assert_eq!(err.host_kind(), Some(proxywasm_sdk::proxywasm_api::ErrorKind::CallerError));
}
