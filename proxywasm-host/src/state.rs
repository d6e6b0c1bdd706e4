//! Emulated host state
//!
//! Everything the emulator remembers between host calls. The operations here
//! are plain data manipulation returning the ABI [`Status`] on failure; the
//! [`ProxyHost`](proxywasm_sdk::hostcall::ProxyHost) implementation in
//! `host.rs` only adapts raw arguments to them.

use proxywasm_api::{Action, BufferMode, Headers, LogLevel, MetricType, Status};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;

/// Id of the single plugin context the emulator creates
pub const PLUGIN_CONTEXT_ID: u32 = 1;

/// Clock value at emulator start (2023-11-14T22:13:20Z)
pub(crate) const CLOCK_START_NANOS: u64 = 1_700_000_000_000_000_000;

/// Clock advance per read, so consecutive reads never compare equal
pub(crate) const CLOCK_STEP_NANOS: u64 = 1_000;

/// Local response sent by a stream with `send_http_response`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalResponse {
    pub status_code: u32,
    pub status_code_details: String,
    pub body: Vec<u8>,
    pub headers: Headers,
    /// `None` when the response is not a gRPC response
    pub grpc_status: Option<i32>,
}

/// What a context asked for when it dispatched a callout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalloutAttribute {
    pub callout_id: u32,
    pub upstream: String,
    pub headers: Headers,
    pub trailers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Default)]
pub(crate) struct HttpStream {
    pub request_headers: Headers,
    pub request_trailers: Headers,
    pub request_body: Vec<u8>,
    pub response_headers: Headers,
    pub response_trailers: Headers,
    pub response_body: Vec<u8>,
    /// The previous body hook paused, so the next chunk is appended
    pub request_body_buffering: bool,
    pub response_body_buffering: bool,
    pub action: Action,
    pub local_response: Option<LocalResponse>,
    pub closed: bool,
    /// `on_delete` was delivered; the state stays readable
    pub deleted: bool,
}

#[derive(Debug, Default)]
pub(crate) struct TcpStream {
    pub downstream_data: Vec<u8>,
    pub upstream_data: Vec<u8>,
    pub downstream_buffering: bool,
    pub upstream_buffering: bool,
    pub action: Action,
    pub downstream_closed: bool,
    pub upstream_closed: bool,
    pub deleted: bool,
}

#[derive(Debug)]
pub(crate) struct Metric {
    pub name: String,
    pub kind: MetricType,
    pub value: u64,
    pub samples: Vec<u64>,
}

#[derive(Debug)]
pub(crate) struct SharedQueue {
    pub name: String,
    pub owner: u32,
    pub items: VecDeque<Vec<u8>>,
}

/// Response currently being delivered through `on_http_call_response`
#[derive(Debug, Default)]
pub(crate) struct CalloutResponse {
    pub headers: Headers,
    pub trailers: Headers,
    pub body: Vec<u8>,
}

pub(crate) type ForeignFunction = Rc<dyn Fn(&[u8]) -> Vec<u8>>;

pub(crate) struct HostState {
    pub clock_nanos: u64,
    pub log_level: LogLevel,
    pub logs: BTreeMap<LogLevel, Vec<String>>,

    pub vm_id: String,
    pub vm_configuration: Vec<u8>,
    pub plugin_configuration: Vec<u8>,

    pub active_context_id: u32,
    pub next_context_id: u32,
    pub tick_period: Duration,
    pub plugin_done: bool,

    pub http_streams: HashMap<u32, HttpStream>,
    pub tcp_streams: HashMap<u32, TcpStream>,

    pub next_callout_id: u32,
    /// Pending callout id -> dispatching context
    pub pending_callouts: HashMap<u32, u32>,
    /// Every callout ever dispatched, per context, in dispatch order
    pub callout_attributes: HashMap<u32, Vec<CalloutAttribute>>,
    pub callout_response: Option<CalloutResponse>,

    pub shared_data: HashMap<String, (Vec<u8>, u32)>,
    pub queues: Vec<SharedQueue>,
    pub metrics: Vec<Metric>,
    pub properties: HashMap<Vec<String>, Vec<u8>>,
    pub foreign_functions: HashMap<String, ForeignFunction>,

    /// Contexts with an up-call in progress, outermost first
    pub driving: Vec<u32>,
    /// `on_queue_ready` notifications held back while their owner was busy
    pub pending_queue_ready: VecDeque<(u32, u32)>,
}

impl Default for HostState {
    fn default() -> Self {
        Self {
            clock_nanos: CLOCK_START_NANOS,
            log_level: LogLevel::Trace,
            logs: BTreeMap::new(),
            vm_id: String::new(),
            vm_configuration: Vec::new(),
            plugin_configuration: Vec::new(),
            active_context_id: PLUGIN_CONTEXT_ID,
            next_context_id: PLUGIN_CONTEXT_ID + 1,
            tick_period: Duration::ZERO,
            plugin_done: false,
            http_streams: HashMap::new(),
            tcp_streams: HashMap::new(),
            next_callout_id: 1,
            pending_callouts: HashMap::new(),
            callout_attributes: HashMap::new(),
            callout_response: None,
            shared_data: HashMap::new(),
            queues: Vec::new(),
            metrics: Vec::new(),
            properties: HashMap::new(),
            foreign_functions: HashMap::new(),
            driving: Vec::new(),
            pending_queue_ready: VecDeque::new(),
        }
    }
}

/// Copy `[start, min(start + max_size, len))`; an empty buffer is `not-found`
pub(crate) fn read_range(buffer: &[u8], start: usize, max_size: usize) -> Result<Vec<u8>, Status> {
    if buffer.is_empty() {
        return Err(Status::NotFound);
    }
    let start = start.min(buffer.len());
    let end = start.saturating_add(max_size).min(buffer.len());
    Ok(buffer[start..end].to_vec())
}

pub(crate) fn write_range(
    buffer: &mut Vec<u8>,
    start: usize,
    max_size: usize,
    data: &[u8],
) -> Result<(), Status> {
    match BufferMode::from_range(start, max_size).ok_or(Status::BadArgument)? {
        BufferMode::Append => buffer.extend_from_slice(data),
        BufferMode::Prepend => {
            buffer.splice(0..0, data.iter().copied());
        }
        BufferMode::Replace => {
            buffer.clear();
            buffer.extend_from_slice(data);
        }
    }
    Ok(())
}

/// Store a delivered chunk: appended while the filter is buffering, otherwise
/// replacing what the previous hook saw
pub(crate) fn accept_chunk(buffer: &mut Vec<u8>, buffering: bool, chunk: &[u8]) {
    if !buffering {
        buffer.clear();
    }
    buffer.extend_from_slice(chunk);
}

pub(crate) fn to_headers<K: AsRef<str>, V: AsRef<str>>(pairs: &[(K, V)]) -> Headers {
    pairs
        .iter()
        .map(|(k, v)| (k.as_ref().to_string(), v.as_ref().to_string()))
        .collect()
}

impl HostState {
    pub fn now(&mut self) -> u64 {
        self.clock_nanos += CLOCK_STEP_NANOS;
        self.clock_nanos
    }

    pub fn record_log(&mut self, level: LogLevel, message: String) {
        self.logs.entry(level).or_default().push(message);
    }

    // ------------------------------------------------------------
    // Shared data
    // ------------------------------------------------------------

    pub fn get_shared_data(&self, key: &str) -> Result<(Vec<u8>, u32), Status> {
        self.shared_data.get(key).cloned().ok_or(Status::NotFound)
    }

    /// Strict compare-and-swap: an absent key has CAS 0
    pub fn set_shared_data(&mut self, key: &str, value: &[u8], cas: u32) -> Result<(), Status> {
        let current = self.shared_data.get(key).map(|(_, cas)| *cas).unwrap_or(0);
        if current != cas {
            return Err(Status::CasMismatch);
        }
        self.shared_data
            .insert(key.to_string(), (value.to_vec(), current.wrapping_add(1)));
        Ok(())
    }

    // ------------------------------------------------------------
    // Queues
    // ------------------------------------------------------------

    pub fn register_queue(&mut self, name: &str, owner: u32) -> u32 {
        if let Some(id) = self.queues.iter().position(|q| q.name == name) {
            self.queues[id].owner = owner;
            return id as u32;
        }
        self.queues.push(SharedQueue {
            name: name.to_string(),
            owner,
            items: VecDeque::new(),
        });
        (self.queues.len() - 1) as u32
    }

    pub fn resolve_queue(&self, name: &str) -> Result<u32, Status> {
        self.queues
            .iter()
            .position(|q| q.name == name)
            .map(|id| id as u32)
            .ok_or(Status::NotFound)
    }

    /// Push an item; returns the owner to notify
    pub fn enqueue(&mut self, queue_id: u32, data: &[u8]) -> Result<u32, Status> {
        let queue = self
            .queues
            .get_mut(queue_id as usize)
            .ok_or(Status::NotFound)?;
        queue.items.push_back(data.to_vec());
        Ok(queue.owner)
    }

    pub fn dequeue(&mut self, queue_id: u32) -> Result<Vec<u8>, Status> {
        let queue = self
            .queues
            .get_mut(queue_id as usize)
            .ok_or(Status::NotFound)?;
        queue.items.pop_front().ok_or(Status::Empty)
    }

    // ------------------------------------------------------------
    // Metrics
    // ------------------------------------------------------------

    pub fn define_metric(&mut self, kind: MetricType, name: &str) -> Result<u32, Status> {
        if let Some(id) = self.metrics.iter().position(|m| m.name == name) {
            if self.metrics[id].kind != kind {
                return Err(Status::BadArgument);
            }
            return Ok(id as u32);
        }
        self.metrics.push(Metric {
            name: name.to_string(),
            kind,
            value: 0,
            samples: Vec::new(),
        });
        Ok((self.metrics.len() - 1) as u32)
    }

    fn metric_mut(&mut self, metric_id: u32) -> Result<&mut Metric, Status> {
        self.metrics
            .get_mut(metric_id as usize)
            .ok_or(Status::NotFound)
    }

    pub fn increment_metric(&mut self, metric_id: u32, offset: i64) -> Result<(), Status> {
        let metric = self.metric_mut(metric_id)?;
        metric.value = match metric.kind {
            MetricType::Counter if offset < 0 => return Err(Status::BadArgument),
            MetricType::Counter => metric
                .value
                .checked_add_signed(offset)
                .ok_or(Status::BadArgument)?,
            // gauges are signed; the value carries the i64 bit pattern
            MetricType::Gauge => metric.value.wrapping_add_signed(offset),
            MetricType::Histogram => return Err(Status::BadArgument),
        };
        Ok(())
    }

    pub fn record_metric(&mut self, metric_id: u32, value: u64) -> Result<(), Status> {
        let metric = self.metric_mut(metric_id)?;
        match metric.kind {
            MetricType::Counter => return Err(Status::BadArgument),
            MetricType::Gauge => {}
            MetricType::Histogram => metric.samples.push(value),
        }
        metric.value = value;
        Ok(())
    }

    pub fn get_metric(&self, metric_id: u32) -> Result<u64, Status> {
        self.metrics
            .get(metric_id as usize)
            .map(|m| m.value)
            .ok_or(Status::NotFound)
    }

    pub fn metric_by_name(&self, name: &str) -> Option<&Metric> {
        self.metrics.iter().find(|m| m.name == name)
    }
}
