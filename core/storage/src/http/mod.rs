//! Backends reached over HTTP.

pub mod auth;
pub mod rpc;
pub mod tree;

pub use auth::{RestAuthBackend, RestAuthConfig};
pub use rpc::{HttpRpcConfig, HttpRpcSession};
pub use tree::{RestTreeConfig, RestTreeStore};

use reqwest::{Client, StatusCode};
use std::time::Duration;

use unigate_common::{Error, Result};

/// User agent sent when none is configured.
pub const DEFAULT_USER_AGENT: &str = "unigate/0.1";

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Build the shared HTTP client for one backend.
pub(crate) fn build_client(timeout_secs: u64, user_agent: &str) -> Result<Client> {
    Client::builder()
        .user_agent(user_agent)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Transport(format!("Failed to create HTTP client: {}", e)))
}

/// Map a non-success status onto the error taxonomy.
pub(crate) fn status_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Error::Unauthorized(format!("{}: {}", status, body))
        }
        StatusCode::NOT_FOUND => Error::NotFound(format!("Resource not found: {}", body)),
        _ => Error::Transport(format!("API error: {} - {}", status, body)),
    }
}

/// Map a request that never produced a response.
pub(crate) fn send_error(context: &str, err: reqwest::Error) -> Error {
    Error::Transport(format!("{}: {}", context, err))
}

/// Join a base URL and a relative path with exactly one slash.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
