//! Backend sessions for the unified gateway.
//!
//! This crate defines one narrow capability trait per backend kind
//! (documents, hierarchical tree, blobs, RPC, authentication), the
//! implementations shipped with the gateway, and a registry for
//! resolving them from configuration.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic leaks into the gateway
//! - Async operations: all I/O operations are async
//! - Streaming support: blobs are transferred as byte streams
//! - Unified error semantics: every backend reports through one error type

pub mod context;
pub mod http;
pub mod local;
pub mod memory;
pub mod registry;
pub mod session;

pub use context::BackendContext;
pub use http::{
    HttpRpcConfig, HttpRpcSession, RestAuthBackend, RestAuthConfig, RestTreeConfig, RestTreeStore,
};
pub use local::{LocalBlobStore, LocalDocumentStore, PartFile};
pub use memory::{
    MemoryAuthBackend, MemoryBlobStore, MemoryDocumentStore, MemoryRpcSession, MemoryTreeStore,
    RpcHandler,
};
pub use registry::{
    create_default_registries, BackendSpec, BackendsConfig, Registries, SessionFactory,
    SessionRegistry,
};
pub use session::{
    AuthBackend, AuthGrant, BlobMetadata, BlobStoreSession, ByteStream, DocumentStoreSession,
    DocumentWrite, HttpMethod, RpcReply, RpcRequest, RpcSession, Tokens, TreeStoreSession,
    UserIdentity,
};
