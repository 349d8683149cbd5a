//! Common types shared by the gateway crates.
//!
//! This module provides the error taxonomy, the response envelope, entity
//! descriptors and backend addresses used throughout the codebase.

pub mod address;
pub mod error;
pub mod response;
pub mod types;

pub use address::{Address, BackendKind};
pub use error::{Error, ErrorKind, Result};
pub use response::{Response, ResponseError, Status};
pub use types::{Entity, EntityDescriptor, EntityId, EntityKind, SecretString, StorePath};
