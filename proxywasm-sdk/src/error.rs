//! SDK error type

use proxywasm_api::{CodecError, ErrorKind, HostError};
use thiserror::Error;

/// Errors returned by the typed host-call layer
#[derive(Debug, Error)]
pub enum Error {
    /// The host rejected the call
    #[error("host call failed: {0}")]
    Host(#[from] HostError),

    /// The host answered, but the bytes did not decode as the expected type
    #[error("failed to decode host data: {0}")]
    Decode(#[from] CodecError),

    /// Plugin configuration is not valid JSON for the requested type
    #[error("invalid configuration: {0}")]
    Configuration(#[from] serde_json::Error),

    /// The active context is not owned by any plugin context
    #[error("no plugin context owns active context {0}")]
    NoActiveContext(u32),
}

impl Error {
    /// Host failure category, if this error came from the host
    pub fn host_kind(&self) -> Option<ErrorKind> {
        match self {
            Self::Host(err) => Some(err.kind()),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Host(HostError::NotFound))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Host(HostError::Empty))
    }

    pub fn is_cas_mismatch(&self) -> bool {
        matches!(self, Self::Host(HostError::CasMismatch))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
