//! Uniform response envelope returned by every gateway operation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{Error, ErrorKind};

/// Outcome of a gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Error,
}

/// Response envelope.
///
/// A call yields exactly one of the two variants: a success carrying the
/// data, or an error carrying its kind and a human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response<T> {
    /// The call succeeded.
    Success {
        /// Returned data (`()` for calls without a result).
        data: T,
    },
    /// The call failed.
    Error {
        /// Taxonomy bucket of the failure.
        kind: ErrorKind,
        /// Human-readable description.
        #[serde(rename = "errorMessage")]
        message: String,
    },
}

/// Error half of a response, detached from the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ResponseError {
    pub kind: ErrorKind,
    pub message: String,
}

impl<T> Response<T> {
    /// Build a success envelope.
    pub fn success(data: T) -> Self {
        Response::Success { data }
    }

    /// Build an error envelope.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Response::Error {
            kind,
            message: message.into(),
        }
    }

    /// Convert a result into an envelope.
    pub fn from_result(result: crate::Result<T>) -> Self {
        match result {
            Ok(data) => Response::success(data),
            Err(err) => err.into(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Response::Success { .. } => Status::Success,
            Response::Error { .. } => Status::Error,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Response::Success { .. })
    }

    pub fn is_error(&self) -> bool {
        !self.is_success()
    }

    /// Borrow the data of a successful response.
    pub fn data(&self) -> Option<&T> {
        match self {
            Response::Success { data } => Some(data),
            Response::Error { .. } => None,
        }
    }

    /// Take the data of a successful response.
    pub fn into_data(self) -> Option<T> {
        match self {
            Response::Success { data } => Some(data),
            Response::Error { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Response::Success { .. } => None,
            Response::Error { message, .. } => Some(message),
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Response::Success { .. } => None,
            Response::Error { kind, .. } => Some(*kind),
        }
    }

    /// Transform the success data, leaving errors untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        match self {
            Response::Success { data } => Response::Success { data: f(data) },
            Response::Error { kind, message } => Response::Error { kind, message },
        }
    }

    /// Convert the envelope back into a `Result`.
    pub fn into_result(self) -> std::result::Result<T, ResponseError> {
        match self {
            Response::Success { data } => Ok(data),
            Response::Error { kind, message } => Err(ResponseError { kind, message }),
        }
    }
}

impl<T> From<Error> for Response<T> {
    fn from(err: Error) -> Self {
        Response::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_has_no_error_message() {
        let response = Response::success(42);
        assert_eq!(response.status(), Status::Success);
        assert_eq!(response.data(), Some(&42));
        assert!(response.error_message().is_none());
        assert!(response.error_kind().is_none());
    }

    #[test]
    fn test_error_has_no_data() {
        let response: Response<u32> = Error::NotFound("profiles/u1".into()).into();
        assert_eq!(response.status(), Status::Error);
        assert!(response.data().is_none());
        assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(response.error_message(), Some("Not found: profiles/u1"));
    }

    #[test]
    fn test_map_and_into_result() {
        let doubled = Response::success(21).map(|n| n * 2);
        assert_eq!(doubled.into_result(), Ok(42));

        let failed: Response<u32> = Response::error(ErrorKind::Cancelled, "stop");
        let err = failed.map(|n| n + 1).into_result().unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
        assert_eq!(err.to_string(), "cancelled: stop");
    }

    #[test]
    fn test_wire_shape() {
        let ok = serde_json::to_value(Response::success("Ann")).unwrap();
        assert_eq!(ok, serde_json::json!({"status": "success", "data": "Ann"}));

        let err: Response<()> = Response::error(ErrorKind::MalformedPayload, "bad body");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "status": "error",
                "kind": "malformed_payload",
                "errorMessage": "bad body"
            })
        );

        let back: Response<()> = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }
}
