//! Printer bridge error types

use protocol::{ErrorKind, MethodError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Manager, device or connection not set up yet
    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    #[error("no bulk OUT endpoint on interface 0")]
    NoBulkOutEndpoint,

    #[error("{0} not found")]
    NotFound(String),

    #[error("a permission request is already pending")]
    PermissionPending,

    #[error("{operation} error: {source}")]
    Transfer {
        operation: &'static str,
        #[source]
        source: rusb::Error,
    },

    #[error("maxLength {requested} exceeds the host limit of {limit} bytes")]
    TransferTooLarge { requested: usize, limit: usize },

    #[error("failed to open device: {0}")]
    Open(#[source] rusb::Error),

    #[error("failed to claim interface {interface}: {source}")]
    Claim {
        interface: u8,
        #[source]
        source: rusb::Error,
    },

    #[error("host error: {0}")]
    Host(#[from] rusb::Error),

    #[error("event subscription failed: {0}")]
    Subscription(String),

    #[error("background task failed: {0}")]
    Task(String),
}

impl Error {
    /// Category reported across the method boundary
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotInitialized(_) | Error::NoBulkOutEndpoint | Error::Subscription(_) => {
                ErrorKind::IllegalState
            }
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionPending => ErrorKind::Busy,
            Error::TransferTooLarge { .. } => ErrorKind::InvalidArgument,
            Error::Transfer { .. }
            | Error::Open(_)
            | Error::Claim { .. }
            | Error::Host(_)
            | Error::Task(_) => ErrorKind::Unknown,
        }
    }
}

impl From<Error> for MethodError {
    fn from(err: Error) -> Self {
        MethodError::new(err.kind(), err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
