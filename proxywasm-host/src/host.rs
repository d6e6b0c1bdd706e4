//! [`ProxyHost`] implementation over the emulated state
//!
//! Calls that act on a stream address the emulator's active context, which
//! the drive methods set before every up-call and `set_effective_context`
//! switches while a callout response is delivered.

use crate::state::{
    read_range, write_range, HostState, HttpStream, LocalResponse, TcpStream, CalloutAttribute,
    PLUGIN_CONTEXT_ID,
};
use proxywasm_api::codec::{deserialize_map, deserialize_property_path, serialize_map};
use proxywasm_api::{BufferType, Headers, LogLevel, MapType, MetricType, Status, StreamType};
use proxywasm_sdk::exports;
use proxywasm_sdk::hostcall::ProxyHost;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Default)]
pub(crate) struct Host {
    pub state: RefCell<HostState>,
}

fn status(result: Result<(), Status>) -> Status {
    result.err().unwrap_or(Status::Ok)
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

fn http_stream(state: &mut HostState) -> Result<&mut HttpStream, Status> {
    let id = state.active_context_id;
    state.http_streams.get_mut(&id).ok_or(Status::NotFound)
}

fn tcp_stream(state: &mut HostState) -> Result<&mut TcpStream, Status> {
    let id = state.active_context_id;
    state.tcp_streams.get_mut(&id).ok_or(Status::NotFound)
}

fn header_map(state: &mut HostState, map_type: u32) -> Result<&mut Headers, Status> {
    match MapType::try_from(map_type)? {
        MapType::HttpRequestHeaders => Ok(&mut http_stream(state)?.request_headers),
        MapType::HttpRequestTrailers => Ok(&mut http_stream(state)?.request_trailers),
        MapType::HttpResponseHeaders => Ok(&mut http_stream(state)?.response_headers),
        MapType::HttpResponseTrailers => Ok(&mut http_stream(state)?.response_trailers),
        MapType::HttpCallResponseHeaders => state
            .callout_response
            .as_mut()
            .map(|r| &mut r.headers)
            .ok_or(Status::NotFound),
        MapType::HttpCallResponseTrailers => state
            .callout_response
            .as_mut()
            .map(|r| &mut r.trailers)
            .ok_or(Status::NotFound),
        MapType::GrpcReceiveInitialMetadata | MapType::GrpcReceiveTrailingMetadata => {
            Err(Status::Unimplemented)
        }
    }
}

fn buffer(state: &mut HostState, buffer_type: u32) -> Result<&mut Vec<u8>, Status> {
    match BufferType::try_from(buffer_type)? {
        BufferType::HttpRequestBody => Ok(&mut http_stream(state)?.request_body),
        BufferType::HttpResponseBody => Ok(&mut http_stream(state)?.response_body),
        BufferType::DownstreamData => Ok(&mut tcp_stream(state)?.downstream_data),
        BufferType::UpstreamData => Ok(&mut tcp_stream(state)?.upstream_data),
        BufferType::HttpCallResponseBody => state
            .callout_response
            .as_mut()
            .map(|r| &mut r.body)
            .ok_or(Status::NotFound),
        BufferType::VmConfiguration => Ok(&mut state.vm_configuration),
        BufferType::PluginConfiguration => Ok(&mut state.plugin_configuration),
        BufferType::GrpcReceiveBuffer => Err(Status::Unimplemented),
    }
}

fn emit_guest_log(level: LogLevel, context_id: u32, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(target: "proxywasm::guest", context_id, "{message}"),
        LogLevel::Debug => tracing::debug!(target: "proxywasm::guest", context_id, "{message}"),
        LogLevel::Info => tracing::info!(target: "proxywasm::guest", context_id, "{message}"),
        LogLevel::Warn => tracing::warn!(target: "proxywasm::guest", context_id, "{message}"),
        LogLevel::Error => tracing::error!(target: "proxywasm::guest", context_id, "{message}"),
        LogLevel::Critical => {
            tracing::error!(target: "proxywasm::guest", context_id, critical = true, "{message}")
        }
    }
}

/// One up-call on the emulator's stack; popped on return or unwind
struct Frame<'a> {
    host: &'a Host,
    previous: u32,
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.host.state.try_borrow_mut() {
            state.driving.pop();
            state.active_context_id = self.previous;
        }
    }
}

impl Host {
    /// Run one up-call with `context_id` active
    ///
    /// Queue notifications deferred because their owner was busy are
    /// delivered once the outermost up-call returns.
    pub fn drive<R>(&self, context_id: u32, up_call: impl FnOnce() -> R) -> R {
        let previous = {
            let mut state = self.state.borrow_mut();
            state.driving.push(context_id);
            std::mem::replace(&mut state.active_context_id, context_id)
        };
        let frame = Frame { host: self, previous };
        let result = up_call();
        drop(frame);

        let pending = {
            let mut state = self.state.borrow_mut();
            if state.driving.is_empty() {
                std::mem::take(&mut state.pending_queue_ready)
            } else {
                VecDeque::new()
            }
        };
        for (owner, queue_id) in pending {
            self.deliver_queue_ready(owner, queue_id);
        }
        result
    }

    fn deliver_queue_ready(&self, owner: u32, queue_id: u32) {
        tracing::trace!(owner, queue_id, "delivering on_queue_ready");
        self.drive(owner, || exports::proxy_on_queue_ready(owner, queue_id));
    }
}

impl ProxyHost for Host {
    fn log(&self, level: u32, message: &[u8]) -> Status {
        let Ok(level) = LogLevel::try_from(level) else {
            return Status::BadArgument;
        };
        let message = text(message);
        let mut state = self.state.borrow_mut();
        emit_guest_log(level, state.active_context_id, &message);
        state.record_log(level, message);
        Status::Ok
    }

    fn get_log_level(&self, return_level: &mut u32) -> Status {
        *return_level = self.state.borrow().log_level as u32;
        Status::Ok
    }

    fn get_current_time_nanoseconds(&self, return_time: &mut u64) -> Status {
        *return_time = self.state.borrow_mut().now();
        Status::Ok
    }

    fn set_tick_period_milliseconds(&self, period: u32) -> Status {
        self.state.borrow_mut().tick_period = Duration::from_millis(u64::from(period));
        tracing::debug!(period_ms = period, "tick period set");
        Status::Ok
    }

    fn get_buffer_bytes(
        &self,
        buffer_type: u32,
        start: usize,
        max_size: usize,
        return_data: &mut Vec<u8>,
    ) -> Status {
        let mut state = self.state.borrow_mut();
        status(buffer(&mut state, buffer_type).and_then(|buffer| {
            *return_data = read_range(buffer, start, max_size)?;
            Ok(())
        }))
    }

    fn set_buffer_bytes(
        &self,
        buffer_type: u32,
        start: usize,
        max_size: usize,
        data: &[u8],
    ) -> Status {
        if matches!(
            BufferType::try_from(buffer_type),
            Ok(BufferType::VmConfiguration
                | BufferType::PluginConfiguration
                | BufferType::HttpCallResponseBody)
        ) {
            return Status::BadArgument;
        }
        let mut state = self.state.borrow_mut();
        status(
            buffer(&mut state, buffer_type)
                .and_then(|buffer| write_range(buffer, start, max_size, data)),
        )
    }

    fn get_header_map_pairs(&self, map_type: u32, return_data: &mut Vec<u8>) -> Status {
        let mut state = self.state.borrow_mut();
        status(
            header_map(&mut state, map_type)
                .map(|map| *return_data = serialize_map(map.as_slice())),
        )
    }

    fn set_header_map_pairs(&self, map_type: u32, data: &[u8]) -> Status {
        let Ok(pairs) = deserialize_map(data) else {
            return Status::BadArgument;
        };
        let mut state = self.state.borrow_mut();
        status(header_map(&mut state, map_type).map(|map| *map = pairs))
    }

    fn get_header_map_value(
        &self,
        map_type: u32,
        key: &[u8],
        return_value: &mut Vec<u8>,
    ) -> Status {
        let key = text(key);
        let mut state = self.state.borrow_mut();
        status(header_map(&mut state, map_type).and_then(|map| {
            let (_, value) = map
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&key))
                .ok_or(Status::NotFound)?;
            *return_value = value.as_bytes().to_vec();
            Ok(())
        }))
    }

    fn add_header_map_value(&self, map_type: u32, key: &[u8], value: &[u8]) -> Status {
        let mut state = self.state.borrow_mut();
        status(header_map(&mut state, map_type).map(|map| map.push((text(key), text(value)))))
    }

    fn replace_header_map_value(&self, map_type: u32, key: &[u8], value: &[u8]) -> Status {
        let key = text(key);
        let value = text(value);
        let mut state = self.state.borrow_mut();
        status(header_map(&mut state, map_type).map(|map| {
            match map.iter().position(|(k, _)| k.eq_ignore_ascii_case(&key)) {
                Some(first) => {
                    map[first].1 = value;
                    let mut index = 0;
                    map.retain(|(k, _)| {
                        let keep = index <= first || !k.eq_ignore_ascii_case(&key);
                        index += 1;
                        keep
                    });
                }
                None => map.push((key, value)),
            }
        }))
    }

    fn remove_header_map_value(&self, map_type: u32, key: &[u8]) -> Status {
        let key = text(key);
        let mut state = self.state.borrow_mut();
        status(
            header_map(&mut state, map_type)
                .map(|map| map.retain(|(k, _)| !k.eq_ignore_ascii_case(&key))),
        )
    }

    fn send_local_response(
        &self,
        status_code: u32,
        status_code_details: &[u8],
        body: &[u8],
        headers: &[u8],
        grpc_status: i32,
    ) -> Status {
        let Ok(headers) = deserialize_map(headers) else {
            return Status::BadArgument;
        };
        let mut state = self.state.borrow_mut();
        let context_id = state.active_context_id;
        status(http_stream(&mut state).map(|stream| {
            stream.local_response = Some(LocalResponse {
                status_code,
                status_code_details: text(status_code_details),
                body: body.to_vec(),
                headers,
                grpc_status: (grpc_status >= 0).then_some(grpc_status),
            });
            tracing::debug!(context_id, status_code, "local response recorded");
        }))
    }

    fn continue_stream(&self, stream_type: u32) -> Status {
        let mut state = self.state.borrow_mut();
        status(StreamType::try_from(stream_type).and_then(|stream_type| match stream_type {
            StreamType::HttpRequest | StreamType::HttpResponse => {
                http_stream(&mut state)?.action = proxywasm_api::Action::Continue;
                Ok(())
            }
            StreamType::Downstream | StreamType::Upstream => {
                tcp_stream(&mut state)?.action = proxywasm_api::Action::Continue;
                Ok(())
            }
        }))
    }

    fn close_stream(&self, stream_type: u32) -> Status {
        let mut state = self.state.borrow_mut();
        status(StreamType::try_from(stream_type).and_then(|stream_type| match stream_type {
            StreamType::HttpRequest | StreamType::HttpResponse => {
                http_stream(&mut state)?.closed = true;
                Ok(())
            }
            StreamType::Downstream => {
                tcp_stream(&mut state)?.downstream_closed = true;
                Ok(())
            }
            StreamType::Upstream => {
                tcp_stream(&mut state)?.upstream_closed = true;
                Ok(())
            }
        }))
    }

    fn http_call(
        &self,
        upstream: &[u8],
        headers: &[u8],
        body: &[u8],
        trailers: &[u8],
        _timeout_ms: u32,
        return_callout_id: &mut u32,
    ) -> Status {
        let (Ok(headers), Ok(trailers)) = (deserialize_map(headers), deserialize_map(trailers))
        else {
            return Status::BadArgument;
        };
        let mut state = self.state.borrow_mut();
        let context_id = state.active_context_id;
        let callout_id = state.next_callout_id;
        state.next_callout_id += 1;

        let attribute = CalloutAttribute {
            callout_id,
            upstream: text(upstream),
            headers,
            trailers,
            body: body.to_vec(),
        };
        tracing::debug!(context_id, callout_id, upstream = %attribute.upstream, "callout recorded");
        state.pending_callouts.insert(callout_id, context_id);
        state
            .callout_attributes
            .entry(context_id)
            .or_default()
            .push(attribute);

        *return_callout_id = callout_id;
        Status::Ok
    }

    fn call_foreign_function(
        &self,
        name: &[u8],
        argument: &[u8],
        return_data: &mut Vec<u8>,
    ) -> Status {
        let function = self.state.borrow().foreign_functions.get(&text(name)).cloned();
        match function {
            Some(function) => {
                *return_data = function(argument);
                Status::Ok
            }
            None => Status::NotFound,
        }
    }

    fn get_shared_data(
        &self,
        key: &[u8],
        return_value: &mut Vec<u8>,
        return_cas: &mut u32,
    ) -> Status {
        status(self.state.borrow().get_shared_data(&text(key)).map(|(value, cas)| {
            *return_value = value;
            *return_cas = cas;
        }))
    }

    fn set_shared_data(&self, key: &[u8], value: &[u8], cas: u32) -> Status {
        status(self.state.borrow_mut().set_shared_data(&text(key), value, cas))
    }

    fn register_shared_queue(&self, name: &[u8], return_id: &mut u32) -> Status {
        *return_id = self
            .state
            .borrow_mut()
            .register_queue(&text(name), PLUGIN_CONTEXT_ID);
        Status::Ok
    }

    fn resolve_shared_queue(&self, _vm_id: &[u8], name: &[u8], return_id: &mut u32) -> Status {
        status(self.state.borrow().resolve_queue(&text(name)).map(|id| *return_id = id))
    }

    fn enqueue_shared_queue(&self, queue_id: u32, data: &[u8]) -> Status {
        let notify_now = {
            let mut state = self.state.borrow_mut();
            let owner = match state.enqueue(queue_id, data) {
                Ok(owner) => owner,
                Err(err) => return err,
            };
            // the owner is already in a hook further up the stack
            if state.driving.contains(&owner) {
                state.pending_queue_ready.push_back((owner, queue_id));
                None
            } else {
                Some(owner)
            }
        };
        if let Some(owner) = notify_now {
            self.deliver_queue_ready(owner, queue_id);
        }
        Status::Ok
    }

    fn dequeue_shared_queue(&self, queue_id: u32, return_data: &mut Vec<u8>) -> Status {
        status(self.state.borrow_mut().dequeue(queue_id).map(|data| *return_data = data))
    }

    fn define_metric(&self, metric_type: u32, name: &[u8], return_id: &mut u32) -> Status {
        let mut state = self.state.borrow_mut();
        status(
            MetricType::try_from(metric_type)
                .and_then(|kind| state.define_metric(kind, &text(name)))
                .map(|id| *return_id = id),
        )
    }

    fn increment_metric(&self, metric_id: u32, offset: i64) -> Status {
        status(self.state.borrow_mut().increment_metric(metric_id, offset))
    }

    fn record_metric(&self, metric_id: u32, value: u64) -> Status {
        status(self.state.borrow_mut().record_metric(metric_id, value))
    }

    fn get_metric(&self, metric_id: u32, return_value: &mut u64) -> Status {
        status(self.state.borrow().get_metric(metric_id).map(|value| *return_value = value))
    }

    fn get_property(&self, path: &[u8], return_data: &mut Vec<u8>) -> Status {
        let Ok(path) = deserialize_property_path(path) else {
            return Status::BadArgument;
        };
        match self.state.borrow().properties.get(&path) {
            Some(value) => {
                *return_data = value.clone();
                Status::Ok
            }
            None => Status::NotFound,
        }
    }

    fn set_property(&self, path: &[u8], value: &[u8]) -> Status {
        let Ok(path) = deserialize_property_path(path) else {
            return Status::BadArgument;
        };
        self.state.borrow_mut().properties.insert(path, value.to_vec());
        Status::Ok
    }

    fn set_effective_context(&self, context_id: u32) -> Status {
        let mut state = self.state.borrow_mut();
        let known = context_id == PLUGIN_CONTEXT_ID
            || state.http_streams.get(&context_id).is_some_and(|s| !s.deleted)
            || state.tcp_streams.get(&context_id).is_some_and(|s| !s.deleted);
        if !known {
            return Status::BadArgument;
        }
        state.active_context_id = context_id;
        Status::Ok
    }

    fn done(&self) -> Status {
        self.state.borrow_mut().plugin_done = true;
        tracing::debug!("plugin reported done");
        Status::Ok
    }
}
