//! Proxy-Wasm ABI v0.2.1 enumerations
//!
//! Every enum here crosses the host boundary as a plain integer. Conversions
//! from the wire are fallible (`TryFrom<u32>`), conversions to the wire are
//! total (`as u32` through the `repr`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Result status returned by every host function
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Ok = 0,
    NotFound = 1,
    BadArgument = 2,
    SerializationFailure = 3,
    ParseFailure = 4,
    BadExpression = 5,
    InvalidMemoryAccess = 6,
    Empty = 7,
    CasMismatch = 8,
    ResultMismatch = 9,
    InternalFailure = 10,
    BrokenConnection = 11,
    Unimplemented = 12,
}

impl Status {
    /// Raw ABI value
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Decode a raw status; unknown codes collapse to `InternalFailure`
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Ok,
            1 => Self::NotFound,
            2 => Self::BadArgument,
            3 => Self::SerializationFailure,
            4 => Self::ParseFailure,
            5 => Self::BadExpression,
            6 => Self::InvalidMemoryAccess,
            7 => Self::Empty,
            8 => Self::CasMismatch,
            9 => Self::ResultMismatch,
            11 => Self::BrokenConnection,
            12 => Self::Unimplemented,
            _ => Self::InternalFailure,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "ok",
            Self::NotFound => "not-found",
            Self::BadArgument => "bad-argument",
            Self::SerializationFailure => "serialization-failure",
            Self::ParseFailure => "parse-failure",
            Self::BadExpression => "bad-expression",
            Self::InvalidMemoryAccess => "invalid-memory-access",
            Self::Empty => "empty",
            Self::CasMismatch => "cas-mismatch",
            Self::ResultMismatch => "result-mismatch",
            Self::InternalFailure => "internal-failure",
            Self::BrokenConnection => "broken-connection",
            Self::Unimplemented => "unimplemented",
        };
        f.write_str(name)
    }
}

/// Value returned by traffic hooks to tell the host whether to proceed
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    #[default]
    Continue = 0,
    Pause = 1,
}

impl Action {
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// Host log levels
#[repr(u32)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    #[default]
    Info = 2,
    Warn = 3,
    Error = 4,
    Critical = 5,
}

impl LogLevel {
    pub const ALL: [LogLevel; 6] = [
        Self::Trace,
        Self::Debug,
        Self::Info,
        Self::Warn,
        Self::Error,
        Self::Critical,
    ];
}

impl TryFrom<u32> for LogLevel {
    type Error = Status;

    fn try_from(raw: u32) -> Result<Self, Status> {
        Self::ALL
            .get(raw as usize)
            .copied()
            .ok_or(Status::BadArgument)
    }
}

/// Header and trailer maps addressable through the header-map imports
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapType {
    HttpRequestHeaders = 0,
    HttpRequestTrailers = 1,
    HttpResponseHeaders = 2,
    HttpResponseTrailers = 3,
    GrpcReceiveInitialMetadata = 4,
    GrpcReceiveTrailingMetadata = 5,
    HttpCallResponseHeaders = 6,
    HttpCallResponseTrailers = 7,
}

impl TryFrom<u32> for MapType {
    type Error = Status;

    fn try_from(raw: u32) -> Result<Self, Status> {
        Ok(match raw {
            0 => Self::HttpRequestHeaders,
            1 => Self::HttpRequestTrailers,
            2 => Self::HttpResponseHeaders,
            3 => Self::HttpResponseTrailers,
            4 => Self::GrpcReceiveInitialMetadata,
            5 => Self::GrpcReceiveTrailingMetadata,
            6 => Self::HttpCallResponseHeaders,
            7 => Self::HttpCallResponseTrailers,
            _ => return Err(Status::BadArgument),
        })
    }
}

/// Byte buffers addressable through `get_buffer_bytes`/`set_buffer_bytes`
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    HttpRequestBody = 0,
    HttpResponseBody = 1,
    DownstreamData = 2,
    UpstreamData = 3,
    HttpCallResponseBody = 4,
    GrpcReceiveBuffer = 5,
    VmConfiguration = 6,
    PluginConfiguration = 7,
}

impl TryFrom<u32> for BufferType {
    type Error = Status;

    fn try_from(raw: u32) -> Result<Self, Status> {
        Ok(match raw {
            0 => Self::HttpRequestBody,
            1 => Self::HttpResponseBody,
            2 => Self::DownstreamData,
            3 => Self::UpstreamData,
            4 => Self::HttpCallResponseBody,
            5 => Self::GrpcReceiveBuffer,
            6 => Self::VmConfiguration,
            7 => Self::PluginConfiguration,
            _ => return Err(Status::BadArgument),
        })
    }
}

/// Streams that can be resumed or closed
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    HttpRequest = 0,
    HttpResponse = 1,
    Downstream = 2,
    Upstream = 3,
}

impl TryFrom<u32> for StreamType {
    type Error = Status;

    fn try_from(raw: u32) -> Result<Self, Status> {
        Ok(match raw {
            0 => Self::HttpRequest,
            1 => Self::HttpResponse,
            2 => Self::Downstream,
            3 => Self::Upstream,
            _ => return Err(Status::BadArgument),
        })
    }
}

/// Metric kinds
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    Counter = 0,
    Gauge = 1,
    Histogram = 2,
}

impl TryFrom<u32> for MetricType {
    type Error = Status;

    fn try_from(raw: u32) -> Result<Self, Status> {
        Ok(match raw {
            0 => Self::Counter,
            1 => Self::Gauge,
            2 => Self::Histogram,
            _ => return Err(Status::BadArgument),
        })
    }
}

/// Which side closed a TCP connection
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PeerType {
    #[default]
    Unknown = 0,
    Local = 1,
    Remote = 2,
}

impl From<u32> for PeerType {
    fn from(raw: u32) -> Self {
        match raw {
            1 => Self::Local,
            2 => Self::Remote,
            _ => Self::Unknown,
        }
    }
}

/// Write mode for `set_buffer_bytes`
///
/// The host distinguishes the three modes only through the `(start, max_size)`
/// pair passed alongside the data; no other combination is valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferMode {
    Append,
    Prepend,
    Replace,
}

/// Sentinel used for "end of buffer" and "whole buffer" in `set_buffer_bytes`
pub const BUFFER_SENTINEL: usize = i32::MAX as usize;

impl BufferMode {
    /// `(start, max_size)` pair the host expects for this mode
    pub fn range(self) -> (usize, usize) {
        match self {
            Self::Append => (BUFFER_SENTINEL, 0),
            Self::Prepend => (0, 0),
            Self::Replace => (0, BUFFER_SENTINEL),
        }
    }

    /// Recover the mode from a `(start, max_size)` pair
    pub fn from_range(start: usize, max_size: usize) -> Option<Self> {
        match (start, max_size) {
            (BUFFER_SENTINEL, 0) => Some(Self::Append),
            (0, 0) => Some(Self::Prepend),
            (0, BUFFER_SENTINEL) => Some(Self::Replace),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_from_raw() {
        assert_eq!(Status::from_raw(0), Status::Ok);
        assert_eq!(Status::from_raw(8), Status::CasMismatch);
        assert_eq!(Status::from_raw(12), Status::Unimplemented);
        assert_eq!(Status::from_raw(999), Status::InternalFailure);
        assert_eq!(Status::CasMismatch.to_string(), "cas-mismatch");
    }

    #[test]
    fn test_action_raw_values() {
        assert_eq!(Action::Continue.as_raw(), 0);
        assert_eq!(Action::Pause.as_raw(), 1);
        assert_eq!(Action::default(), Action::Continue);
    }

    #[test]
    fn test_log_level_conversion() {
        assert_eq!(LogLevel::try_from(5), Ok(LogLevel::Critical));
        assert_eq!(LogLevel::try_from(6), Err(Status::BadArgument));
        assert!(LogLevel::Warn > LogLevel::Info);

        let level: LogLevel = serde_json::from_str("\"warn\"").unwrap();
        assert_eq!(level, LogLevel::Warn);
    }

    #[test]
    fn test_buffer_mode_sentinels() {
        assert_eq!(BufferMode::Append.range(), (i32::MAX as usize, 0));
        assert_eq!(BufferMode::Prepend.range(), (0, 0));
        assert_eq!(BufferMode::Replace.range(), (0, i32::MAX as usize));

        for mode in [BufferMode::Append, BufferMode::Prepend, BufferMode::Replace] {
            let (start, max) = mode.range();
            assert_eq!(BufferMode::from_range(start, max), Some(mode));
        }
        assert_eq!(BufferMode::from_range(3, 4), None);
    }

    #[test]
    fn test_map_and_buffer_types() {
        assert_eq!(MapType::try_from(6), Ok(MapType::HttpCallResponseHeaders));
        assert!(MapType::try_from(8).is_err());
        assert_eq!(BufferType::try_from(7), Ok(BufferType::PluginConfiguration));
        assert_eq!(StreamType::try_from(2), Ok(StreamType::Downstream));
        assert_eq!(MetricType::try_from(2), Ok(MetricType::Histogram));
        assert_eq!(PeerType::from(2), PeerType::Remote);
    }
}
