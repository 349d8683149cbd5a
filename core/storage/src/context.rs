//! The set of backend sessions a gateway is built over.

use std::sync::Arc;

use unigate_common::Result;

use crate::memory::{
    MemoryAuthBackend, MemoryBlobStore, MemoryDocumentStore, MemoryRpcSession, MemoryTreeStore,
};
use crate::session::{
    AuthBackend, BlobStoreSession, DocumentStoreSession, RpcSession, TreeStoreSession,
};

/// Already-constructed backend sessions, one per capability.
///
/// Cloning is cheap; every session is shared.
#[derive(Clone)]
pub struct BackendContext {
    pub documents: Arc<dyn DocumentStoreSession>,
    pub tree: Arc<dyn TreeStoreSession>,
    pub blobs: Arc<dyn BlobStoreSession>,
    pub rpc: Arc<dyn RpcSession>,
    pub auth: Arc<dyn AuthBackend>,
}

impl BackendContext {
    /// Context where every backend is held in memory.
    pub fn in_memory() -> Self {
        Self {
            documents: Arc::new(MemoryDocumentStore::new()),
            tree: Arc::new(MemoryTreeStore::new()),
            blobs: Arc::new(MemoryBlobStore::new()),
            rpc: Arc::new(MemoryRpcSession::new()),
            auth: Arc::new(MemoryAuthBackend::new()),
        }
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentStoreSession>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_tree(mut self, tree: Arc<dyn TreeStoreSession>) -> Self {
        self.tree = tree;
        self
    }

    pub fn with_blobs(mut self, blobs: Arc<dyn BlobStoreSession>) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn with_rpc(mut self, rpc: Arc<dyn RpcSession>) -> Self {
        self.rpc = rpc;
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthBackend>) -> Self {
        self.auth = auth;
        self
    }

    /// Initialize every session, stopping at the first failure.
    pub async fn initialize(&self) -> Result<()> {
        self.documents.initialize().await?;
        self.tree.initialize().await?;
        self.blobs.initialize().await?;
        self.rpc.initialize().await?;
        self.auth.initialize().await?;
        Ok(())
    }

    /// Backend names, for diagnostics.
    pub fn describe(&self) -> String {
        format!(
            "documents={} tree={} blobs={} rpc={} auth={}",
            self.documents.name(),
            self.tree.name(),
            self.blobs.name(),
            self.rpc.name(),
            self.auth.name()
        )
    }
}

impl Default for BackendContext {
    fn default() -> Self {
        Self::in_memory()
    }
}
