//! Backend-specific addresses produced by the address resolver.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::StorePath;

/// The four backend families the gateway fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Document,
    Tree,
    Blob,
    Rpc,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Document => "document",
            BackendKind::Tree => "tree",
            BackendKind::Blob => "blob",
            BackendKind::Rpc => "rpc",
        };
        f.write_str(name)
    }
}

/// Opaque backend location.
///
/// Only the address resolver constructs these from descriptors; backends
/// consume the inner path of the variant that belongs to them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Address {
    /// A single document in the document store.
    Document(StorePath),
    /// A document collection, used when the store allocates the identifier.
    Collection(StorePath),
    /// A node in the tree store.
    Tree(StorePath),
    /// An object in the blob store.
    Blob(StorePath),
    /// A callable name or endpoint path on the RPC gateway.
    Callable(String),
}

impl Address {
    pub fn backend(&self) -> BackendKind {
        match self {
            Address::Document(_) | Address::Collection(_) => BackendKind::Document,
            Address::Tree(_) => BackendKind::Tree,
            Address::Blob(_) => BackendKind::Blob,
            Address::Callable(_) => BackendKind::Rpc,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Document(path) => write!(f, "document:{}", path),
            Address::Collection(path) => write!(f, "collection:{}", path),
            Address::Tree(path) => write!(f, "tree:{}", path),
            Address::Blob(path) => write!(f, "blob:{}", path),
            Address::Callable(name) => write!(f, "rpc:{}", name),
        }
    }
}
