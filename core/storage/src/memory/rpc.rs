//! In-process RPC session backed by registered handler closures.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::debug;

use unigate_common::{Error, Result};

use super::poisoned;
use crate::session::{RpcReply, RpcRequest, RpcSession};

/// Handler invoked for one callable name.
pub type RpcHandler = Arc<dyn Fn(&RpcRequest) -> Result<RpcReply> + Send + Sync>;

/// In-process RPC session.
///
/// Dispatches by callable name to registered handlers and keeps the most
/// recent requests it received for inspecting headers and payloads.
pub struct MemoryRpcSession {
    handlers: RwLock<HashMap<String, RpcHandler>>,
    received: Mutex<VecDeque<RpcRequest>>,
    history_limit: usize,
    latency: Option<Duration>,
}

/// Requests kept by default.
const DEFAULT_HISTORY_LIMIT: usize = 64;

impl MemoryRpcSession {
    /// Create a session with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            received: Mutex::new(VecDeque::new()),
            history_limit: DEFAULT_HISTORY_LIMIT,
            latency: None,
        }
    }

    /// Delay every dispatch by `latency` before the handler runs.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Keep at most `limit` received requests. Zero disables recording.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Register a handler for `name`, replacing any existing one.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: impl Fn(&RpcRequest) -> Result<RpcReply> + Send + Sync + 'static,
    ) -> Result<()> {
        self.handlers
            .write()
            .map_err(poisoned)?
            .insert(name.into(), Arc::new(handler));
        Ok(())
    }

    /// Most recent requests received, in dispatch order.
    pub fn requests(&self) -> Vec<RpcRequest> {
        self.received
            .lock()
            .map(|received| received.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryRpcSession {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RpcSession for MemoryRpcSession {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<()> {
        debug!("Memory RPC session ready");
        Ok(())
    }

    async fn dispatch(&self, request: RpcRequest) -> Result<RpcReply> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self.history_limit > 0 {
            let mut received = self.received.lock().map_err(poisoned)?;
            if received.len() == self.history_limit {
                received.pop_front();
            }
            received.push_back(request.clone());
        }

        let handler = self
            .handlers
            .read()
            .map_err(poisoned)?
            .get(&request.target)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("No callable named '{}'", request.target)))?;

        handler(&request)
    }
}
