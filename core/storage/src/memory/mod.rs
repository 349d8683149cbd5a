//! In-memory backends for testing and development.
//!
//! All data is stored in memory and lost on drop.

pub mod auth;
pub mod blob;
pub mod document;
pub mod rpc;
pub mod tree;

pub use auth::MemoryAuthBackend;
pub use blob::MemoryBlobStore;
pub use document::MemoryDocumentStore;
pub use rpc::{MemoryRpcSession, RpcHandler};
pub use tree::MemoryTreeStore;

use std::sync::PoisonError;

use unigate_common::Error;

/// Map a poisoned lock into a transport failure.
pub(crate) fn poisoned<T>(_: PoisonError<T>) -> Error {
    Error::Transport("In-memory store lock poisoned".to_string())
}
