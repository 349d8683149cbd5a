//! Cancellation scopes and envelope conversion shared by the clients.

use futures::future::select_all;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use unigate_common::{Error, ErrorKind, Response, Result};

/// A set of cancellation tokens; cancelling any one of them cancels the scope.
///
/// Clients combine the gateway's root token with caller-supplied tokens so
/// that both a shutdown and a caller cancellation end the call.
#[derive(Debug, Clone, Default)]
pub struct CancelScope {
    tokens: Vec<CancellationToken>,
}

impl CancelScope {
    /// Scope that is never cancelled.
    pub fn new() -> Self {
        Self { tokens: Vec::new() }
    }

    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            tokens: vec![token],
        }
    }

    /// This scope extended with `token`.
    pub fn with(&self, token: &CancellationToken) -> Self {
        let mut tokens = self.tokens.clone();
        tokens.push(token.clone());
        Self { tokens }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tokens.iter().any(CancellationToken::is_cancelled)
    }

    /// Fail with `Cancelled` if the scope is already cancelled.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            info!("{} refused: already cancelled", operation);
            return Err(Error::cancelled(operation));
        }
        Ok(())
    }

    /// Completes once any token in the scope is cancelled.
    pub async fn cancelled(&self) {
        if self.tokens.is_empty() {
            return std::future::pending().await;
        }
        let waits = self
            .tokens
            .iter()
            .map(|token| Box::pin(token.cancelled()));
        select_all(waits).await;
    }

    /// Run `fut` unless the scope is cancelled first.
    ///
    /// An already-cancelled scope never polls `fut`. Cancellation while
    /// `fut` is pending drops it, aborting the in-flight backend call.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(operation)?;
        tokio::select! {
            biased;
            _ = self.cancelled() => {
                info!("{} cancelled in flight", operation);
                Err(Error::cancelled(operation))
            }
            result = fut => result,
        }
    }
}

/// Convert a client result into an envelope, logging failures.
pub(crate) fn respond<T>(operation: &str, result: Result<T>) -> Response<T> {
    match result {
        Ok(data) => Response::success(data),
        Err(err) => {
            match err.kind() {
                ErrorKind::UnsupportedOperation => error!("{} failed: {}", operation, err),
                ErrorKind::Cancelled => info!("{} failed: {}", operation, err),
                _ => warn!("{} failed: {}", operation, err),
            }
            Response::from(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_precancelled_scope_never_polls() {
        let token = CancellationToken::new();
        token.cancel();
        let scope = CancelScope::from_token(token);
        let polled = AtomicBool::new(false);

        let result = scope
            .run("op", async {
                polled.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let caller = CancellationToken::new();
        let scope = CancelScope::new().with(&caller);

        let trigger = caller.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<()> = scope
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled(m)) if m == "slow cancelled"));
    }

    #[tokio::test]
    async fn test_any_token_cancels_scope() {
        let root = CancellationToken::new();
        let caller = CancellationToken::new();
        let scope = CancelScope::from_token(root.clone()).with(&caller);

        assert!(!scope.is_cancelled());
        root.cancel();
        assert!(scope.is_cancelled());
        assert!(scope.check("op").is_err());
    }

    #[tokio::test]
    async fn test_empty_scope_runs() {
        let value = CancelScope::new().run("op", async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn test_respond_maps_kind() {
        let response: Response<()> = respond("op", Err(Error::NotFound("x".into())));
        assert_eq!(response.error_kind(), Some(ErrorKind::NotFound));
    }
}
