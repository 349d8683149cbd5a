//! Common error types for the gateway.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Top-level error type for gateway and backend operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The resolved address has no backing record.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend rejected the caller's credentials, or no session exists.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The caller cancelled the operation while it was in flight.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// A request or response body could not be serialized or deserialized.
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    /// The backend call failed for any other reason.
    #[error("Transport failure: {0}")]
    Transport(String),

    /// No resolution rule exists for an entity kind.
    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Local I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error into the caller-facing taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::MalformedPayload(_) | Error::InvalidInput(_) => ErrorKind::MalformedPayload,
            Error::Transport(_) | Error::Io(_) => ErrorKind::TransportFailure,
            Error::UnsupportedType(_) => ErrorKind::UnsupportedOperation,
        }
    }

    /// Shorthand for a cancellation observed while performing `operation`.
    pub fn cancelled(operation: impl fmt::Display) -> Self {
        Error::Cancelled(format!("{} cancelled", operation))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::MalformedPayload(err.to_string())
    }
}

/// Error taxonomy surfaced to callers through response envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Resolved address has no backing record.
    NotFound,
    /// Authenticated call attempted without a valid session.
    Unauthorized,
    /// Caller-initiated cancellation observed during I/O.
    Cancelled,
    /// Serialization or deserialization failure.
    MalformedPayload,
    /// Network or backend failure of any other kind.
    TransportFailure,
    /// Unregistered entity type; a wiring defect rather than a runtime fault.
    UnsupportedOperation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::MalformedPayload => "malformed payload",
            ErrorKind::TransportFailure => "transport failure",
            ErrorKind::UnsupportedOperation => "unsupported operation",
        };
        f.write_str(name)
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(Error::InvalidInput("x".into()).kind(), ErrorKind::MalformedPayload);
        assert_eq!(
            Error::UnsupportedType("x".into()).kind(),
            ErrorKind::UnsupportedOperation
        );

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(Error::from(io).kind(), ErrorKind::TransportFailure);
    }

    #[test]
    fn test_serde_json_error_is_malformed_payload() {
        let err = serde_json::from_str::<u32>("nope").unwrap_err();
        assert_eq!(Error::from(err).kind(), ErrorKind::MalformedPayload);
    }

    #[test]
    fn test_cancelled_message() {
        let err = Error::cancelled("download");
        assert_eq!(err.to_string(), "Cancelled: download cancelled");
    }
}
