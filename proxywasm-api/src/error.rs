//! Host-call failure taxonomy
//!
//! Every non-ok [`Status`] maps onto a [`HostError`] variant, and every
//! variant belongs to exactly one [`ErrorKind`] category.

use crate::types::Status;
use thiserror::Error;

/// Broad category of a host-call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The requested value does not exist (`not-found`, `empty`)
    MissingData,
    /// The guest passed something the host rejected (`bad-argument`)
    CallerError,
    /// A shared-data write lost a compare-and-swap race
    CasRetry,
    /// The host failed internally
    HostFailure,
    /// The host does not implement the call
    Unsupported,
}

/// Failure returned by a host function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("not found")]
    NotFound,

    #[error("bad argument")]
    BadArgument,

    #[error("empty")]
    Empty,

    #[error("compare-and-swap mismatch")]
    CasMismatch,

    #[error("host internal failure")]
    InternalFailure,

    #[error("unimplemented by host")]
    Unimplemented,

    #[error("unexpected host status: {0}")]
    Unexpected(Status),
}

impl HostError {
    /// Category of this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound | Self::Empty => ErrorKind::MissingData,
            Self::BadArgument => ErrorKind::CallerError,
            Self::CasMismatch => ErrorKind::CasRetry,
            Self::Unimplemented => ErrorKind::Unsupported,
            Self::InternalFailure | Self::Unexpected(_) => ErrorKind::HostFailure,
        }
    }

    /// Status code this error was derived from
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound => Status::NotFound,
            Self::BadArgument => Status::BadArgument,
            Self::Empty => Status::Empty,
            Self::CasMismatch => Status::CasMismatch,
            Self::InternalFailure => Status::InternalFailure,
            Self::Unimplemented => Status::Unimplemented,
            Self::Unexpected(status) => *status,
        }
    }
}

impl Status {
    /// `Ok(())` for [`Status::Ok`], the matching [`HostError`] otherwise
    pub fn into_result(self) -> Result<(), HostError> {
        match self {
            Status::Ok => Ok(()),
            Status::NotFound => Err(HostError::NotFound),
            Status::BadArgument => Err(HostError::BadArgument),
            Status::Empty => Err(HostError::Empty),
            Status::CasMismatch => Err(HostError::CasMismatch),
            Status::InternalFailure => Err(HostError::InternalFailure),
            Status::Unimplemented => Err(HostError::Unimplemented),
            other => Err(HostError::Unexpected(other)),
        }
    }
}

impl From<HostError> for Status {
    fn from(err: HostError) -> Self {
        err.status()
    }
}
