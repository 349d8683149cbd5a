//! Unified gateway over document, tree, blob, RPC and auth backends.
//!
//! Callers address records by logical [`EntityDescriptor`]s; the
//! [`AddressResolver`] maps them onto backend addresses and every client
//! reports its outcome as a [`Response`] envelope instead of failing.
//!
//! [`EntityDescriptor`]: unigate_common::EntityDescriptor
//! [`Response`]: unigate_common::Response

pub mod auth;
pub mod batch;
pub mod blob;
pub mod cancel;
pub mod config;
pub mod document;
pub mod gateway;
pub mod paths;
pub mod resolver;
pub mod rpc;
pub mod tree;

pub use auth::SessionProvider;
pub use batch::{Batch, BatchCoordinator, BatchOperation};
pub use blob::BlobClient;
pub use cancel::CancelScope;
pub use config::GatewayConfig;
pub use document::DocumentClient;
pub use gateway::Gateway;
pub use paths::{DirectoryPathResolver, LocalPathResolver};
pub use resolver::{AddressResolver, ResolutionRule, Shape};
pub use rpc::{encode_query, CallRequest, CallState, RpcClient};
pub use tree::TreeClient;
