//! Session registries for resolving backends from configuration.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use unigate_common::{Error, Result};

use crate::context::BackendContext;
use crate::http::{HttpRpcConfig, HttpRpcSession, RestAuthBackend, RestAuthConfig, RestTreeConfig, RestTreeStore};
use crate::local::{LocalBlobStore, LocalDocumentStore};
use crate::memory::{
    MemoryAuthBackend, MemoryBlobStore, MemoryDocumentStore, MemoryRpcSession, MemoryTreeStore,
};
use crate::session::{
    AuthBackend, BlobStoreSession, DocumentStoreSession, RpcSession, TreeStoreSession,
};

/// Factory function type for creating sessions.
pub type SessionFactory<S> = Box<dyn Fn(Value) -> Result<Arc<S>> + Send + Sync>;

/// Registry of session factories for one capability.
///
/// Allows dynamic registration and resolution of backends
/// by provider name and options.
pub struct SessionRegistry<S: ?Sized> {
    factories: HashMap<String, SessionFactory<S>>,
}

impl<S: ?Sized> SessionRegistry<S> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a session factory.
    ///
    /// # Preconditions
    /// - `name` must be unique within the registry
    ///
    /// # Errors
    /// - Returns error if name is already registered
    pub fn register(&mut self, name: impl Into<String>, factory: SessionFactory<S>) -> Result<()> {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(Error::InvalidInput(format!(
                "Provider '{}' is already registered",
                name
            )));
        }
        self.factories.insert(name, factory);
        Ok(())
    }

    /// Add a factory, replacing any previous one under `name`.
    pub fn with(mut self, name: impl Into<String>, factory: SessionFactory<S>) -> Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Resolve a session by provider name and options.
    ///
    /// # Errors
    /// - Provider not found
    /// - Options invalid
    pub fn resolve(&self, name: &str, options: Value) -> Result<Arc<S>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Provider '{}' is not registered", name)))?;
        factory(options)
    }

    /// Get list of registered provider names.
    pub fn providers(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    /// Check if a provider is registered.
    pub fn has_provider(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }
}

impl<S: ?Sized> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Which provider backs a capability, and its options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendSpec {
    pub provider: String,
    #[serde(default)]
    pub options: Value,
}

impl BackendSpec {
    pub fn new(provider: impl Into<String>, options: Value) -> Self {
        Self {
            provider: provider.into(),
            options,
        }
    }

    pub fn memory() -> Self {
        Self::new("memory", Value::Null)
    }
}

impl Default for BackendSpec {
    fn default() -> Self {
        Self::memory()
    }
}

/// Provider selection for every capability. Unset entries use memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendsConfig {
    #[serde(rename = "document")]
    pub documents: BackendSpec,
    pub tree: BackendSpec,
    #[serde(rename = "blob")]
    pub blobs: BackendSpec,
    pub rpc: BackendSpec,
    pub auth: BackendSpec,
}

/// One registry per capability.
pub struct Registries {
    pub documents: SessionRegistry<dyn DocumentStoreSession>,
    pub tree: SessionRegistry<dyn TreeStoreSession>,
    pub blobs: SessionRegistry<dyn BlobStoreSession>,
    pub rpc: SessionRegistry<dyn RpcSession>,
    pub auth: SessionRegistry<dyn AuthBackend>,
}

impl Registries {
    /// Resolve every capability named in `config`.
    pub fn build_context(&self, config: &BackendsConfig) -> Result<BackendContext> {
        Ok(BackendContext {
            documents: self
                .documents
                .resolve(&config.documents.provider, config.documents.options.clone())?,
            tree: self
                .tree
                .resolve(&config.tree.provider, config.tree.options.clone())?,
            blobs: self
                .blobs
                .resolve(&config.blobs.provider, config.blobs.options.clone())?,
            rpc: self
                .rpc
                .resolve(&config.rpc.provider, config.rpc.options.clone())?,
            auth: self
                .auth
                .resolve(&config.auth.provider, config.auth.options.clone())?,
        })
    }
}

fn root_option(options: &Value, provider: &str) -> Result<String> {
    options
        .get("root")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidInput(format!("{} provider requires 'root' path", provider)))
}

/// Options for providers with no usable defaults, such as a remote `base_url`.
fn required_options<T: DeserializeOwned>(options: Value, provider: &str) -> Result<T> {
    if options.is_null() {
        return Err(Error::InvalidInput(format!(
            "{} provider requires options",
            provider
        )));
    }
    parse_options(options, provider)
}

fn parse_options<T: DeserializeOwned>(options: Value, provider: &str) -> Result<T> {
    serde_json::from_value(options)
        .map_err(|e| Error::InvalidInput(format!("Invalid options for '{}': {}", provider, e)))
}

/// Create registries with the built-in providers.
pub fn create_default_registries() -> Registries {
    let documents = SessionRegistry::<dyn DocumentStoreSession>::new()
        .with(
            "memory",
            Box::new(|_| Ok(Arc::new(MemoryDocumentStore::new()) as Arc<dyn DocumentStoreSession>)),
        )
        .with(
            "local",
            Box::new(|options| {
                let root = root_option(&options, "local")?;
                Ok(Arc::new(LocalDocumentStore::new(root)?) as Arc<dyn DocumentStoreSession>)
            }),
        );

    let tree = SessionRegistry::<dyn TreeStoreSession>::new()
        .with(
            "memory",
            Box::new(|options| {
                let store = if options.is_null() {
                    MemoryTreeStore::new()
                } else {
                    MemoryTreeStore::from_value(options)
                };
                Ok(Arc::new(store) as Arc<dyn TreeStoreSession>)
            }),
        )
        .with(
            "rest",
            Box::new(|options| {
                let config: RestTreeConfig = required_options(options, "rest")?;
                Ok(Arc::new(RestTreeStore::new(config)?) as Arc<dyn TreeStoreSession>)
            }),
        );

    let blobs = SessionRegistry::<dyn BlobStoreSession>::new()
        .with(
            "memory",
            Box::new(|_| Ok(Arc::new(MemoryBlobStore::new()) as Arc<dyn BlobStoreSession>)),
        )
        .with(
            "local",
            Box::new(|options| {
                let root = root_option(&options, "local")?;
                Ok(Arc::new(LocalBlobStore::new(root)?) as Arc<dyn BlobStoreSession>)
            }),
        );

    let rpc = SessionRegistry::<dyn RpcSession>::new()
        .with(
            "memory",
            Box::new(|_| Ok(Arc::new(MemoryRpcSession::new()) as Arc<dyn RpcSession>)),
        )
        .with(
            "http",
            Box::new(|options| {
                let config: HttpRpcConfig = if options.is_null() {
                    HttpRpcConfig::default()
                } else {
                    parse_options(options, "http")?
                };
                Ok(Arc::new(HttpRpcSession::new(config)?) as Arc<dyn RpcSession>)
            }),
        );

    let auth = SessionRegistry::<dyn AuthBackend>::new()
        .with(
            "memory",
            Box::new(|_| Ok(Arc::new(MemoryAuthBackend::new()) as Arc<dyn AuthBackend>)),
        )
        .with(
            "rest",
            Box::new(|options| {
                let config: RestAuthConfig = required_options(options, "rest")?;
                Ok(Arc::new(RestAuthBackend::new(config)?) as Arc<dyn AuthBackend>)
            }),
        );

    Registries {
        documents,
        tree,
        blobs,
        rpc,
        auth,
    }
}
