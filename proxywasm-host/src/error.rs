//! Emulator error type

use proxywasm_api::MetricType;
use thiserror::Error;

/// Errors reported by the emulator's drive and inspection methods
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EmulatorError {
    /// `on_vm_start` returned false
    #[error("module rejected VM start")]
    VmStartRejected,

    /// `on_configure` returned false
    #[error("module rejected plugin configuration")]
    PluginStartRejected,

    /// The id was never created through the emulator
    #[error("unknown context: {0}")]
    UnknownContext(u32),

    /// The context already received `on_delete`
    #[error("context {0} was already deleted")]
    ContextDeleted(u32),

    #[error("metric not defined: {0}")]
    UnknownMetric(String),

    #[error("metric '{name}' is a {actual:?}, not a {expected:?}")]
    WrongMetricKind {
        name: String,
        expected: MetricType,
        actual: MetricType,
    },

    /// No callout with this id is waiting for a response
    #[error("no pending callout with id {0}")]
    UnknownCallout(u32),
}
