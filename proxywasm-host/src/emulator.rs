//! Test driver: plays the proxy's side of the ABI against in-process filters
//!
//! ```text
//! test ─drive─▶ HostEmulator ─proxy_on_*─▶ dispatcher ─▶ user contexts
//!                    ▲                                     │
//!                    └────────── ProxyHost calls ◀─────────┘
//! ```
//!
//! A [`HostEmulator`] holds a process-wide lock for its whole lifetime, so
//! tests using it run one at a time. Dropping it resets the module's context
//! registry, uninstalls the host and releases the lock, also when the test
//! panics.

use crate::error::EmulatorError;
use crate::host::Host;
use crate::state::{
    accept_chunk, to_headers, CalloutAttribute, CalloutResponse, HttpStream, LocalResponse,
    TcpStream, PLUGIN_CONTEXT_ID,
};
use proxywasm_api::{Action, Headers, LogLevel, MetricType, PeerType};
use proxywasm_sdk::{dispatcher, exports, hostcall, VmContext};
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

static EMULATOR_LOCK: Mutex<()> = Mutex::new(());

/// Emulator configuration
#[derive(Debug, Clone, Default)]
pub struct EmulatorOptions {
    pub vm_id: String,
    pub vm_configuration: Vec<u8>,
    pub plugin_configuration: Vec<u8>,
    pub properties: Vec<(Vec<String>, Vec<u8>)>,
    /// Level reported by `get_log_level`; `None` reports trace
    pub log_level: Option<LogLevel>,
}

impl EmulatorOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vm_id(mut self, vm_id: impl Into<String>) -> Self {
        self.vm_id = vm_id.into();
        self
    }

    /// Bytes the module reads through `vm_configuration()` during VM start
    pub fn with_vm_configuration(mut self, configuration: impl Into<Vec<u8>>) -> Self {
        self.vm_configuration = configuration.into();
        self
    }

    /// Bytes the module reads through `plugin_configuration()` during plugin start
    pub fn with_plugin_configuration(mut self, configuration: impl Into<Vec<u8>>) -> Self {
        self.plugin_configuration = configuration.into();
        self
    }

    /// Pre-seed a property
    pub fn with_property<S: AsRef<str>>(mut self, path: &[S], value: impl Into<Vec<u8>>) -> Self {
        let path = path.iter().map(|s| s.as_ref().to_string()).collect();
        self.properties.push((path, value.into()));
        self
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }
}

/// In-process host driving one module instance
pub struct HostEmulator {
    host: Rc<Host>,
    _lock: MutexGuard<'static, ()>,
}

impl HostEmulator {
    /// Start a module with default options
    pub fn new(vm: impl VmContext + 'static) -> Result<Self, EmulatorError> {
        Self::with_options(vm, EmulatorOptions::default())
    }

    /// Register `vm`, then create the plugin context and run VM and plugin start
    pub fn with_options(
        vm: impl VmContext + 'static,
        options: EmulatorOptions,
    ) -> Result<Self, EmulatorError> {
        let lock = EMULATOR_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        dispatcher::reset();

        let host = Rc::new(Host::default());
        {
            let mut state = host.state.borrow_mut();
            state.vm_id = options.vm_id;
            state.vm_configuration = options.vm_configuration;
            state.plugin_configuration = options.plugin_configuration;
            state.properties.extend(options.properties);
            if let Some(level) = options.log_level {
                state.log_level = level;
            }
        }
        hostcall::install(host.clone());
        dispatcher::set_vm_context(Box::new(vm));

        let emulator = Self { host, _lock: lock };
        emulator.start()?;
        Ok(emulator)
    }

    fn start(&self) -> Result<(), EmulatorError> {
        let id = PLUGIN_CONTEXT_ID;
        self.host
            .drive(id, || exports::proxy_on_context_create(id, 0));

        let vm_size = self.host.state.borrow().vm_configuration.len();
        if self.host.drive(id, || exports::proxy_on_vm_start(id, vm_size)) == 0 {
            return Err(EmulatorError::VmStartRejected);
        }

        let plugin_size = self.host.state.borrow().plugin_configuration.len();
        if self.host.drive(id, || exports::proxy_on_configure(id, plugin_size)) == 0 {
            return Err(EmulatorError::PluginStartRejected);
        }
        tracing::debug!(plugin_context_id = id, "plugin started");
        Ok(())
    }

    fn next_context_id(&self) -> u32 {
        let mut state = self.host.state.borrow_mut();
        let id = state.next_context_id;
        state.next_context_id += 1;
        id
    }

    fn with_http<R>(
        &self,
        context_id: u32,
        f: impl FnOnce(&mut HttpStream) -> R,
    ) -> Result<R, EmulatorError> {
        self.host
            .state
            .borrow_mut()
            .http_streams
            .get_mut(&context_id)
            .map(f)
            .ok_or(EmulatorError::UnknownContext(context_id))
    }

    fn with_tcp<R>(
        &self,
        context_id: u32,
        f: impl FnOnce(&mut TcpStream) -> R,
    ) -> Result<R, EmulatorError> {
        self.host
            .state
            .borrow_mut()
            .tcp_streams
            .get_mut(&context_id)
            .map(f)
            .ok_or(EmulatorError::UnknownContext(context_id))
    }

    /// Run `f` on an HTTP stream the module still holds
    ///
    /// Driving a context the emulator never created, or one already deleted,
    /// is a bug in the test and panics with the context id.
    #[track_caller]
    fn live_http<R>(&self, context_id: u32, f: impl FnOnce(&mut HttpStream) -> R) -> R {
        let result = match self.host.state.borrow_mut().http_streams.get_mut(&context_id) {
            Some(stream) if !stream.deleted => Ok(f(stream)),
            Some(_) => Err(EmulatorError::ContextDeleted(context_id)),
            None => Err(EmulatorError::UnknownContext(context_id)),
        };
        match result {
            Ok(value) => value,
            Err(err) => panic!("cannot drive http context: {err}"),
        }
    }

    /// Run `f` on a TCP stream the module still holds; panics like [`Self::live_http`]
    #[track_caller]
    fn live_tcp<R>(&self, context_id: u32, f: impl FnOnce(&mut TcpStream) -> R) -> R {
        let result = match self.host.state.borrow_mut().tcp_streams.get_mut(&context_id) {
            Some(stream) if !stream.deleted => Ok(f(stream)),
            Some(_) => Err(EmulatorError::ContextDeleted(context_id)),
            None => Err(EmulatorError::UnknownContext(context_id)),
        };
        match result {
            Ok(value) => value,
            Err(err) => panic!("cannot drive tcp context: {err}"),
        }
    }

    // ============================================================
    // Plugin drive
    // ============================================================

    pub fn plugin_context_id(&self) -> u32 {
        PLUGIN_CONTEXT_ID
    }

    /// Deliver one `on_tick` to the plugin
    pub fn tick(&self) {
        let id = PLUGIN_CONTEXT_ID;
        self.host.drive(id, || exports::proxy_on_tick(id));
    }

    /// Ask the plugin to shut down; `false` means it will call `done` later
    pub fn call_on_plugin_done(&self) -> bool {
        let id = PLUGIN_CONTEXT_ID;
        self.host.drive(id, || exports::proxy_on_done(id)) != 0
    }

    /// Delete the plugin context and its pending callouts
    pub fn delete_plugin(&self) {
        let id = PLUGIN_CONTEXT_ID;
        self.host.drive(id, || exports::proxy_on_delete(id));
    }

    /// Deliver the response to a pending callout
    ///
    /// The response is visible through the callout getters for the duration
    /// of the callback only.
    pub fn call_on_http_call_response<K: AsRef<str>, V: AsRef<str>>(
        &self,
        callout_id: u32,
        headers: &[(K, V)],
        trailers: &[(K, V)],
        body: &[u8],
    ) -> Result<(), EmulatorError> {
        let caller_id = {
            let mut state = self.host.state.borrow_mut();
            let caller_id = state
                .pending_callouts
                .remove(&callout_id)
                .ok_or(EmulatorError::UnknownCallout(callout_id))?;
            state.callout_response = Some(CalloutResponse {
                headers: to_headers(headers),
                trailers: to_headers(trailers),
                body: body.to_vec(),
            });
            caller_id
        };
        tracing::debug!(callout_id, caller_id, "delivering callout response");

        let id = PLUGIN_CONTEXT_ID;
        let (num_headers, num_trailers) = (headers.len(), trailers.len());
        let body_size = body.len();
        self.host.drive(id, || {
            exports::proxy_on_http_call_response(
                id,
                callout_id,
                num_headers,
                body_size,
                num_trailers,
            )
        });
        self.host.state.borrow_mut().callout_response = None;
        Ok(())
    }

    // ============================================================
    // HTTP drive
    // ============================================================

    /// Create an HTTP stream context under the plugin; returns its id
    pub fn initialize_http_context(&self) -> u32 {
        let id = self.next_context_id();
        self.host
            .state
            .borrow_mut()
            .http_streams
            .insert(id, HttpStream::default());
        self.host
            .drive(id, || exports::proxy_on_context_create(id, PLUGIN_CONTEXT_ID));
        tracing::debug!(context_id = id, "http context initialized");
        id
    }

    /// # Panics
    ///
    /// When `context_id` is not a live HTTP context created by this emulator.
    /// The same holds for every HTTP drive method.
    #[track_caller]
    pub fn call_on_request_headers<K: AsRef<str>, V: AsRef<str>>(
        &self,
        context_id: u32,
        headers: &[(K, V)],
        end_of_stream: bool,
    ) -> Action {
        self.live_http(context_id, |stream| {
            stream.request_headers = to_headers(headers)
        });
        let action = self.host.drive(context_id, || {
            exports::proxy_on_request_headers(context_id, headers.len(), end_of_stream)
        });
        self.live_http(context_id, |stream| stream.action = action);
        action
    }

    /// Deliver a request body chunk
    ///
    /// While the previous body hook paused, chunks accumulate and the hook
    /// sees the whole buffered body.
    #[track_caller]
    pub fn call_on_request_body(
        &self,
        context_id: u32,
        body: &[u8],
        end_of_stream: bool,
    ) -> Action {
        let size = self.live_http(context_id, |stream| {
            accept_chunk(&mut stream.request_body, stream.request_body_buffering, body);
            stream.request_body.len()
        });
        let action = self.host.drive(context_id, || {
            exports::proxy_on_request_body(context_id, size, end_of_stream)
        });
        self.live_http(context_id, |stream| {
            stream.request_body_buffering = action == Action::Pause;
            stream.action = action;
        });
        action
    }

    #[track_caller]
    pub fn call_on_request_trailers<K: AsRef<str>, V: AsRef<str>>(
        &self,
        context_id: u32,
        trailers: &[(K, V)],
    ) -> Action {
        self.live_http(context_id, |stream| {
            stream.request_trailers = to_headers(trailers)
        });
        let action = self.host.drive(context_id, || {
            exports::proxy_on_request_trailers(context_id, trailers.len())
        });
        self.live_http(context_id, |stream| stream.action = action);
        action
    }

    #[track_caller]
    pub fn call_on_response_headers<K: AsRef<str>, V: AsRef<str>>(
        &self,
        context_id: u32,
        headers: &[(K, V)],
        end_of_stream: bool,
    ) -> Action {
        self.live_http(context_id, |stream| {
            stream.response_headers = to_headers(headers)
        });
        let action = self.host.drive(context_id, || {
            exports::proxy_on_response_headers(context_id, headers.len(), end_of_stream)
        });
        self.live_http(context_id, |stream| stream.action = action);
        action
    }

    /// Deliver a response body chunk; buffering works as for requests
    #[track_caller]
    pub fn call_on_response_body(
        &self,
        context_id: u32,
        body: &[u8],
        end_of_stream: bool,
    ) -> Action {
        let size = self.live_http(context_id, |stream| {
            accept_chunk(&mut stream.response_body, stream.response_body_buffering, body);
            stream.response_body.len()
        });
        let action = self.host.drive(context_id, || {
            exports::proxy_on_response_body(context_id, size, end_of_stream)
        });
        self.live_http(context_id, |stream| {
            stream.response_body_buffering = action == Action::Pause;
            stream.action = action;
        });
        action
    }

    #[track_caller]
    pub fn call_on_response_trailers<K: AsRef<str>, V: AsRef<str>>(
        &self,
        context_id: u32,
        trailers: &[(K, V)],
    ) -> Action {
        self.live_http(context_id, |stream| {
            stream.response_trailers = to_headers(trailers)
        });
        let action = self.host.drive(context_id, || {
            exports::proxy_on_response_trailers(context_id, trailers.len())
        });
        self.live_http(context_id, |stream| stream.action = action);
        action
    }

    /// Finish a stream the way the proxy does: done, log, delete
    ///
    /// The stream's state stays readable afterwards.
    #[track_caller]
    pub fn complete_http_context(&self, context_id: u32) {
        self.live_http(context_id, |_| ());
        self.host.drive(context_id, || exports::proxy_on_done(context_id));
        self.host.drive(context_id, || exports::proxy_on_log(context_id));
        self.host.drive(context_id, || exports::proxy_on_delete(context_id));
        self.live_http(context_id, |stream| stream.deleted = true);
        tracing::debug!(context_id, "http context completed");
    }

    // ============================================================
    // TCP drive
    // ============================================================

    /// Create a TCP stream context and deliver `on_new_connection`
    pub fn initialize_tcp_context(&self) -> (u32, Action) {
        let id = self.next_context_id();
        self.host
            .state
            .borrow_mut()
            .tcp_streams
            .insert(id, TcpStream::default());
        self.host
            .drive(id, || exports::proxy_on_context_create(id, PLUGIN_CONTEXT_ID));
        let action = self.host.drive(id, || exports::proxy_on_new_connection(id));
        self.live_tcp(id, |stream| stream.action = action);
        tracing::debug!(context_id = id, "tcp context initialized");
        (id, action)
    }

    /// # Panics
    ///
    /// When `context_id` is not a live TCP context created by this emulator.
    /// The same holds for every TCP drive method.
    #[track_caller]
    pub fn call_on_downstream_data(
        &self,
        context_id: u32,
        data: &[u8],
        end_of_stream: bool,
    ) -> Action {
        let size = self.live_tcp(context_id, |stream| {
            accept_chunk(&mut stream.downstream_data, stream.downstream_buffering, data);
            stream.downstream_data.len()
        });
        let action = self.host.drive(context_id, || {
            exports::proxy_on_downstream_data(context_id, size, end_of_stream)
        });
        self.live_tcp(context_id, |stream| {
            stream.downstream_buffering = action == Action::Pause;
            stream.action = action;
        });
        action
    }

    #[track_caller]
    pub fn call_on_upstream_data(
        &self,
        context_id: u32,
        data: &[u8],
        end_of_stream: bool,
    ) -> Action {
        let size = self.live_tcp(context_id, |stream| {
            accept_chunk(&mut stream.upstream_data, stream.upstream_buffering, data);
            stream.upstream_data.len()
        });
        let action = self.host.drive(context_id, || {
            exports::proxy_on_upstream_data(context_id, size, end_of_stream)
        });
        self.live_tcp(context_id, |stream| {
            stream.upstream_buffering = action == Action::Pause;
            stream.action = action;
        });
        action
    }

    #[track_caller]
    pub fn call_on_downstream_close(&self, context_id: u32, peer: PeerType) {
        self.live_tcp(context_id, |_| ());
        self.host.drive(context_id, || {
            exports::proxy_on_downstream_connection_close(context_id, peer as u32)
        });
    }

    #[track_caller]
    pub fn call_on_upstream_close(&self, context_id: u32, peer: PeerType) {
        self.live_tcp(context_id, |_| ());
        self.host.drive(context_id, || {
            exports::proxy_on_upstream_connection_close(context_id, peer as u32)
        });
    }

    /// Finish a connection: done, log, delete
    #[track_caller]
    pub fn complete_tcp_context(&self, context_id: u32) {
        self.live_tcp(context_id, |_| ());
        self.host.drive(context_id, || exports::proxy_on_done(context_id));
        self.host.drive(context_id, || exports::proxy_on_log(context_id));
        self.host.drive(context_id, || exports::proxy_on_delete(context_id));
        self.live_tcp(context_id, |stream| stream.deleted = true);
        tracing::debug!(context_id, "tcp context completed");
    }

    // ============================================================
    // Seeding
    // ============================================================

    /// Set a property the module can read
    pub fn set_property<S: AsRef<str>>(&self, path: &[S], value: impl Into<Vec<u8>>) {
        let path = path.iter().map(|s| s.as_ref().to_string()).collect();
        self.host
            .state
            .borrow_mut()
            .properties
            .insert(path, value.into());
    }

    /// Make `name` callable through `call_foreign_function`
    pub fn register_foreign_function(
        &self,
        name: impl Into<String>,
        function: impl Fn(&[u8]) -> Vec<u8> + 'static,
    ) {
        self.host
            .state
            .borrow_mut()
            .foreign_functions
            .insert(name.into(), Rc::new(function));
    }

    pub fn set_log_level(&self, level: LogLevel) {
        self.host.state.borrow_mut().log_level = level;
    }

    // ============================================================
    // Inspection
    // ============================================================

    /// Context host calls from the test body currently address
    pub fn active_context_id(&self) -> u32 {
        self.host.state.borrow().active_context_id
    }

    pub fn vm_id(&self) -> String {
        self.host.state.borrow().vm_id.clone()
    }

    pub fn get_current_request_headers(&self, context_id: u32) -> Result<Headers, EmulatorError> {
        self.with_http(context_id, |stream| stream.request_headers.clone())
    }

    pub fn get_current_request_trailers(&self, context_id: u32) -> Result<Headers, EmulatorError> {
        self.with_http(context_id, |stream| stream.request_trailers.clone())
    }

    pub fn get_current_request_body(&self, context_id: u32) -> Result<Vec<u8>, EmulatorError> {
        self.with_http(context_id, |stream| stream.request_body.clone())
    }

    pub fn get_current_response_headers(&self, context_id: u32) -> Result<Headers, EmulatorError> {
        self.with_http(context_id, |stream| stream.response_headers.clone())
    }

    pub fn get_current_response_trailers(&self, context_id: u32) -> Result<Headers, EmulatorError> {
        self.with_http(context_id, |stream| stream.response_trailers.clone())
    }

    pub fn get_current_response_body(&self, context_id: u32) -> Result<Vec<u8>, EmulatorError> {
        self.with_http(context_id, |stream| stream.response_body.clone())
    }

    /// Last action returned for the stream, or `Continue` after a resume
    pub fn get_current_http_stream_action(&self, context_id: u32) -> Result<Action, EmulatorError> {
        self.with_http(context_id, |stream| stream.action)
    }

    pub fn is_http_stream_closed(&self, context_id: u32) -> Result<bool, EmulatorError> {
        self.with_http(context_id, |stream| stream.closed)
    }

    pub fn get_sent_local_response(
        &self,
        context_id: u32,
    ) -> Result<Option<LocalResponse>, EmulatorError> {
        self.with_http(context_id, |stream| stream.local_response.clone())
    }

    pub fn get_current_downstream_data(&self, context_id: u32) -> Result<Vec<u8>, EmulatorError> {
        self.with_tcp(context_id, |stream| stream.downstream_data.clone())
    }

    pub fn get_current_upstream_data(&self, context_id: u32) -> Result<Vec<u8>, EmulatorError> {
        self.with_tcp(context_id, |stream| stream.upstream_data.clone())
    }

    pub fn get_current_tcp_stream_action(&self, context_id: u32) -> Result<Action, EmulatorError> {
        self.with_tcp(context_id, |stream| stream.action)
    }

    pub fn is_downstream_closed(&self, context_id: u32) -> Result<bool, EmulatorError> {
        self.with_tcp(context_id, |stream| stream.downstream_closed)
    }

    pub fn is_upstream_closed(&self, context_id: u32) -> Result<bool, EmulatorError> {
        self.with_tcp(context_id, |stream| stream.upstream_closed)
    }

    pub fn get_tick_period(&self) -> Duration {
        self.host.state.borrow().tick_period
    }

    /// Callouts dispatched while `context_id` was active, oldest first
    pub fn get_callout_attributes_from_context(&self, context_id: u32) -> Vec<CalloutAttribute> {
        self.host
            .state
            .borrow()
            .callout_attributes
            .get(&context_id)
            .cloned()
            .unwrap_or_default()
    }

    fn metric_value(
        &self,
        name: &str,
        expected: MetricType,
    ) -> Result<(u64, Vec<u64>), EmulatorError> {
        let state = self.host.state.borrow();
        let metric = state
            .metric_by_name(name)
            .ok_or_else(|| EmulatorError::UnknownMetric(name.to_string()))?;
        if metric.kind != expected {
            return Err(EmulatorError::WrongMetricKind {
                name: name.to_string(),
                expected,
                actual: metric.kind,
            });
        }
        Ok((metric.value, metric.samples.clone()))
    }

    pub fn get_counter_metric(&self, name: &str) -> Result<u64, EmulatorError> {
        self.metric_value(name, MetricType::Counter).map(|(value, _)| value)
    }

    pub fn get_gauge_metric(&self, name: &str) -> Result<i64, EmulatorError> {
        self.metric_value(name, MetricType::Gauge)
            .map(|(value, _)| value as i64)
    }

    /// Every sample recorded to a histogram, oldest first
    pub fn get_histogram_metric(&self, name: &str) -> Result<Vec<u64>, EmulatorError> {
        self.metric_value(name, MetricType::Histogram).map(|(_, samples)| samples)
    }

    /// Value and CAS counter of a shared-data key
    pub fn get_shared_data(&self, key: &str) -> Option<(Vec<u8>, u32)> {
        self.host.state.borrow().get_shared_data(key).ok()
    }

    /// Items waiting in a named queue
    pub fn queue_size(&self, name: &str) -> Option<usize> {
        self.host
            .state
            .borrow()
            .queues
            .iter()
            .find(|queue| queue.name == name)
            .map(|queue| queue.items.len())
    }

    /// Raw bytes stored under a property path
    pub fn get_property<S: AsRef<str>>(&self, path: &[S]) -> Option<Vec<u8>> {
        let path: Vec<String> = path.iter().map(|s| s.as_ref().to_string()).collect();
        self.host.state.borrow().properties.get(&path).cloned()
    }

    /// Lines the module logged at `level`, oldest first
    pub fn logs(&self, level: LogLevel) -> Vec<String> {
        self.host
            .state
            .borrow()
            .logs
            .get(&level)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether the module called `done()`
    pub fn is_plugin_done(&self) -> bool {
        self.host.state.borrow().plugin_done
    }
}

impl Drop for HostEmulator {
    fn drop(&mut self) {
        dispatcher::reset();
        hostcall::uninstall();
        tracing::trace!("emulator released");
    }
}
