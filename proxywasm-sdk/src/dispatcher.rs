//! Context registry and up-call dispatch
//!
//! The host addresses every context by a VM-wide integer id, so the module
//! keeps one registry per instance:
//!
//! ```text
//! vm:              VmContext
//! plugins:         pid -> { context, callouts: cid -> { caller_id, callback } }
//! http_streams:    sid -> HttpContext
//! tcp_streams:     sid -> TcpContext
//! parents:         context id -> pid   (plugins map to themselves)
//! active_context:  id the next host call addresses
//! ```
//!
//! Streams refer to their plugin only through `parents`, and callouts refer
//! to their caller only by id, so teardown never has to chase owning
//! pointers: a lookup that misses means "already gone".
//!
//! The registry borrow is never held while user code runs. Each context sits
//! in its own `RefCell`, which lets user code call host functions (and the
//! host call back into other contexts) during a hook.

use crate::context::{HttpContext, PluginContext, TcpContext, VmContext};
use crate::hostcall;
use crate::logging;
use proxywasm_api::{Action, LogLevel, PeerType};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Callback invoked with `(num_headers, body_size, num_trailers)` of a callout response
pub type CalloutCallback = Box<dyn FnOnce(usize, usize, usize)>;

type Shared<T> = Rc<RefCell<Box<T>>>;

struct PendingCallout {
    caller_id: u32,
    callback: CalloutCallback,
}

struct PluginEntry {
    context: Shared<dyn PluginContext>,
    callouts: HashMap<u32, PendingCallout>,
}

#[derive(Default)]
struct Dispatcher {
    vm: Option<Shared<dyn VmContext>>,
    plugins: HashMap<u32, PluginEntry>,
    http_streams: HashMap<u32, Shared<dyn HttpContext>>,
    tcp_streams: HashMap<u32, Shared<dyn TcpContext>>,
    parents: HashMap<u32, u32>,
    active_context_id: u32,
}

/// What `on_delete` took out of the registry, dropped after the borrow ends
enum Removed {
    Plugin(PluginEntry),
    Http(Shared<dyn HttpContext>, Vec<PendingCallout>),
    Tcp(Shared<dyn TcpContext>, Vec<PendingCallout>),
    Bare(Vec<PendingCallout>),
}

thread_local! {
    static DISPATCHER: RefCell<Dispatcher> = RefCell::new(Dispatcher::default());
}

fn with<R>(f: impl FnOnce(&mut Dispatcher) -> R) -> R {
    DISPATCHER.with(|d| f(&mut d.borrow_mut()))
}

/// Log at critical level and abort the instance
pub(crate) fn fatal(message: impl AsRef<str>) -> ! {
    let message = message.as_ref();
    let _ = logging::log(LogLevel::Critical, message);
    panic!("{message}");
}

/// Run `f` on a context, treating re-entry into a busy context as fatal
fn enter<T: ?Sized, R>(context: &Shared<T>, id: u32, f: impl FnOnce(&mut T) -> R) -> R {
    match context.try_borrow_mut() {
        Ok(mut guard) => f(&mut **guard),
        Err(_) => fatal(format!("re-entrant call into context {id}")),
    }
}

// ============================================================
// Registry management
// ============================================================

/// Register the VM context for this module instance
pub fn set_vm_context(vm: Box<dyn VmContext>) {
    with(|d| d.vm = Some(Rc::new(RefCell::new(vm))));
}

/// Drop every context and the VM context
///
/// Used at module teardown and by test harnesses between tests.
pub fn reset() {
    let previous = with(std::mem::take);
    drop(previous);
}

/// Id the next typed host call addresses
pub fn active_context_id() -> u32 {
    with(|d| d.active_context_id)
}

pub(crate) fn set_active_context(id: u32) {
    with(|d| d.active_context_id = id);
}

/// Whether the registry currently knows `context_id`
pub fn context_exists(context_id: u32) -> bool {
    with(|d| d.parents.contains_key(&context_id))
}

/// Plugin context that owns `context_id` (itself for a plugin)
pub fn plugin_id_of(context_id: u32) -> Option<u32> {
    with(|d| d.parents.get(&context_id).copied())
}

/// Record a dispatched callout against the active context's plugin
pub(crate) fn register_callout(
    plugin_id: u32,
    callout_id: u32,
    caller_id: u32,
    callback: CalloutCallback,
) {
    let replaced = with(|d| {
        d.plugins.get_mut(&plugin_id).map(|entry| {
            entry
                .callouts
                .insert(callout_id, PendingCallout { caller_id, callback })
                .is_some()
        })
    });
    match replaced {
        None => fatal(format!(
            "callout {callout_id} dispatched from unknown plugin {plugin_id}"
        )),
        Some(true) => fatal(format!("host reused pending callout id {callout_id}")),
        Some(false) => {
            tracing::trace!(plugin_id, callout_id, caller_id, "callout registered");
        }
    }
}

fn plugin(id: u32) -> Shared<dyn PluginContext> {
    with(|d| d.plugins.get(&id).map(|e| e.context.clone()))
        .unwrap_or_else(|| fatal(format!("unknown plugin context {id}")))
}

fn http(id: u32) -> Shared<dyn HttpContext> {
    with(|d| d.http_streams.get(&id).cloned())
        .unwrap_or_else(|| fatal(format!("unknown http context {id}")))
}

fn tcp(id: u32) -> Shared<dyn TcpContext> {
    with(|d| d.tcp_streams.get(&id).cloned())
        .unwrap_or_else(|| fatal(format!("unknown tcp context {id}")))
}

// ============================================================
// Lifecycle up-calls
// ============================================================

pub(crate) fn on_context_create(context_id: u32, parent_id: u32) {
    if context_exists(context_id) {
        fatal(format!("context {context_id} created twice"));
    }
    set_active_context(context_id);

    if parent_id == 0 {
        let vm = with(|d| d.vm.clone())
            .unwrap_or_else(|| fatal("no VM context registered before first context"));
        let context = enter(&vm, context_id, |vm| vm.new_plugin_context(context_id));
        with(|d| {
            d.plugins.insert(
                context_id,
                PluginEntry {
                    context: Rc::new(RefCell::new(context)),
                    callouts: HashMap::new(),
                },
            );
            d.parents.insert(context_id, context_id);
        });
        tracing::debug!(context_id, "plugin context created");
        return;
    }

    let owner = plugin(parent_id);
    let http_context = enter(&owner, parent_id, |p| p.new_http_context(context_id));
    let tcp_context = match http_context {
        Some(_) => None,
        None => enter(&owner, parent_id, |p| p.new_tcp_context(context_id)),
    };
    with(|d| {
        if let Some(context) = http_context {
            d.http_streams.insert(context_id, Rc::new(RefCell::new(context)));
        } else if let Some(context) = tcp_context {
            d.tcp_streams.insert(context_id, Rc::new(RefCell::new(context)));
        }
        d.parents.insert(context_id, parent_id);
    });
    tracing::debug!(context_id, parent_id, "stream context created");
}

pub(crate) fn on_vm_start(context_id: u32, vm_configuration_size: usize) -> bool {
    set_active_context(context_id);
    let vm = with(|d| d.vm.clone()).unwrap_or_else(|| fatal("no VM context registered"));
    enter(&vm, context_id, |vm| vm.on_vm_start(vm_configuration_size))
}

pub(crate) fn on_configure(context_id: u32, plugin_configuration_size: usize) -> bool {
    set_active_context(context_id);
    let context = plugin(context_id);
    enter(&context, context_id, |p| p.on_plugin_start(plugin_configuration_size))
}

pub(crate) fn on_tick(context_id: u32) {
    set_active_context(context_id);
    let context = plugin(context_id);
    enter(&context, context_id, |p| p.on_tick());
}

pub(crate) fn on_queue_ready(context_id: u32, queue_id: u32) {
    set_active_context(context_id);
    let context = plugin(context_id);
    enter(&context, context_id, |p| p.on_queue_ready(queue_id));
}

pub(crate) fn on_log(context_id: u32) {
    set_active_context(context_id);
    if let Some(context) = with(|d| d.http_streams.get(&context_id).cloned()) {
        enter(&context, context_id, |c| c.on_log());
    } else if let Some(context) = with(|d| d.tcp_streams.get(&context_id).cloned()) {
        enter(&context, context_id, |c| c.on_log());
    } else if !context_exists(context_id) {
        fatal(format!("on_log for unknown context {context_id}"));
    }
}

pub(crate) fn on_done(context_id: u32) -> bool {
    set_active_context(context_id);
    if let Some(context) = with(|d| d.plugins.get(&context_id).map(|e| e.context.clone())) {
        return enter(&context, context_id, |p| p.on_plugin_done());
    }
    if let Some(context) = with(|d| d.http_streams.get(&context_id).cloned()) {
        enter(&context, context_id, |c| c.on_http_stream_done());
    } else if let Some(context) = with(|d| d.tcp_streams.get(&context_id).cloned()) {
        enter(&context, context_id, |c| c.on_stream_done());
    } else if !context_exists(context_id) {
        fatal(format!("on_done for unknown context {context_id}"));
    }
    true
}

pub(crate) fn on_delete(context_id: u32) {
    let removed = with(|d| {
        let parent_id = d.parents.remove(&context_id)?;
        if let Some(entry) = d.plugins.remove(&context_id) {
            return Some(Removed::Plugin(entry));
        }
        // callouts this stream dispatched can no longer be delivered
        let orphaned = d
            .plugins
            .get_mut(&parent_id)
            .map(|entry| {
                let ids: Vec<u32> = entry
                    .callouts
                    .iter()
                    .filter(|(_, c)| c.caller_id == context_id)
                    .map(|(id, _)| *id)
                    .collect();
                ids.into_iter()
                    .filter_map(|id| entry.callouts.remove(&id))
                    .collect()
            })
            .unwrap_or_default();
        if let Some(context) = d.http_streams.remove(&context_id) {
            Some(Removed::Http(context, orphaned))
        } else if let Some(context) = d.tcp_streams.remove(&context_id) {
            Some(Removed::Tcp(context, orphaned))
        } else {
            Some(Removed::Bare(orphaned))
        }
    });

    match removed {
        None => fatal(format!("on_delete for unknown context {context_id}")),
        Some(Removed::Plugin(entry)) => {
            if !entry.callouts.is_empty() {
                tracing::debug!(
                    context_id,
                    dropped = entry.callouts.len(),
                    "plugin deleted with pending callouts"
                );
            }
        }
        Some(Removed::Http(_, orphaned))
        | Some(Removed::Tcp(_, orphaned))
        | Some(Removed::Bare(orphaned)) => {
            if !orphaned.is_empty() {
                tracing::debug!(
                    context_id,
                    dropped = orphaned.len(),
                    "stream deleted with pending callouts"
                );
            }
        }
    }
    tracing::debug!(context_id, "context deleted");
}

// ============================================================
// HTTP up-calls
// ============================================================

pub(crate) fn on_http_request_headers(
    context_id: u32,
    num_headers: usize,
    end_of_stream: bool,
) -> Action {
    set_active_context(context_id);
    enter(&http(context_id), context_id, |c| {
        c.on_http_request_headers(num_headers, end_of_stream)
    })
}

pub(crate) fn on_http_request_body(
    context_id: u32,
    body_size: usize,
    end_of_stream: bool,
) -> Action {
    set_active_context(context_id);
    enter(&http(context_id), context_id, |c| {
        c.on_http_request_body(body_size, end_of_stream)
    })
}

pub(crate) fn on_http_request_trailers(context_id: u32, num_trailers: usize) -> Action {
    set_active_context(context_id);
    enter(&http(context_id), context_id, |c| c.on_http_request_trailers(num_trailers))
}

pub(crate) fn on_http_response_headers(
    context_id: u32,
    num_headers: usize,
    end_of_stream: bool,
) -> Action {
    set_active_context(context_id);
    enter(&http(context_id), context_id, |c| {
        c.on_http_response_headers(num_headers, end_of_stream)
    })
}

pub(crate) fn on_http_response_body(
    context_id: u32,
    body_size: usize,
    end_of_stream: bool,
) -> Action {
    set_active_context(context_id);
    enter(&http(context_id), context_id, |c| {
        c.on_http_response_body(body_size, end_of_stream)
    })
}

pub(crate) fn on_http_response_trailers(context_id: u32, num_trailers: usize) -> Action {
    set_active_context(context_id);
    enter(&http(context_id), context_id, |c| c.on_http_response_trailers(num_trailers))
}

/// Route a callout response back to the callback registered for it
///
/// The record is removed before the callback runs, so it fires at most once.
/// During the callback the active (and effective) context is the caller that
/// dispatched the callout.
pub(crate) fn on_http_call_response(
    plugin_id: u32,
    callout_id: u32,
    num_headers: usize,
    body_size: usize,
    num_trailers: usize,
) {
    set_active_context(plugin_id);
    let pending = with(|d| {
        d.plugins
            .get_mut(&plugin_id)
            .map(|entry| entry.callouts.remove(&callout_id))
    });
    let pending = match pending {
        None => fatal(format!("callout response for unknown plugin {plugin_id}")),
        Some(None) => {
            tracing::debug!(plugin_id, callout_id, "no pending callback for callout");
            return;
        }
        Some(Some(pending)) => pending,
    };

    if !context_exists(pending.caller_id) {
        tracing::debug!(callout_id, caller_id = pending.caller_id, "callout caller gone");
        return;
    }
    set_active_context(pending.caller_id);
    if let Err(status) = hostcall::host()
        .set_effective_context(pending.caller_id)
        .into_result()
    {
        tracing::warn!(
            caller_id = pending.caller_id,
            %status,
            "failed to switch effective context"
        );
    }
    (pending.callback)(num_headers, body_size, num_trailers);
}

// ============================================================
// TCP up-calls
// ============================================================

pub(crate) fn on_new_connection(context_id: u32) -> Action {
    set_active_context(context_id);
    enter(&tcp(context_id), context_id, |c| c.on_new_connection())
}

pub(crate) fn on_downstream_data(context_id: u32, data_size: usize, end_of_stream: bool) -> Action {
    set_active_context(context_id);
    enter(&tcp(context_id), context_id, |c| {
        c.on_downstream_data(data_size, end_of_stream)
    })
}

pub(crate) fn on_downstream_close(context_id: u32, peer: PeerType) {
    set_active_context(context_id);
    enter(&tcp(context_id), context_id, |c| c.on_downstream_close(peer));
}

pub(crate) fn on_upstream_data(context_id: u32, data_size: usize, end_of_stream: bool) -> Action {
    set_active_context(context_id);
    enter(&tcp(context_id), context_id, |c| {
        c.on_upstream_data(data_size, end_of_stream)
    })
}

pub(crate) fn on_upstream_close(context_id: u32, peer: PeerType) {
    set_active_context(context_id);
    enter(&tcp(context_id), context_id, |c| c.on_upstream_close(peer));
}
