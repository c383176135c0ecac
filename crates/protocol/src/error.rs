//! Error kinds reported across the method surface

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error category reported to the calling application
///
/// Only the kind and a human-readable message cross the method boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Manager, device, connection or endpoint not initialized
    IllegalState,
    /// Unknown device identifier, interface or endpoint
    NotFound,
    /// A permission request is already pending
    Busy,
    /// Caller-supplied argument violates a host limit
    InvalidArgument,
    /// The host reported a transfer or I/O failure
    #[serde(rename = "unknown")]
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::IllegalState => "IllegalState",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::Busy => "Busy",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for a failed method call
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct MethodError {
    pub kind: ErrorKind,
    pub message: String,
}

impl MethodError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
