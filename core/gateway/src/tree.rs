//! Tree client: typed reads over raw JSON snapshots of the hierarchical store.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use unigate_common::{EntityDescriptor, EntityId, Error, Response, Result, StorePath};
use unigate_storage::TreeStoreSession;

use crate::cancel::{respond, CancelScope};
use crate::resolver::AddressResolver;

/// Reads and writes nodes of the tree store.
#[derive(Clone)]
pub struct TreeClient {
    session: Arc<dyn TreeStoreSession>,
    resolver: Arc<AddressResolver>,
    scope: CancelScope,
}

impl TreeClient {
    pub fn new(
        session: Arc<dyn TreeStoreSession>,
        resolver: Arc<AddressResolver>,
        scope: CancelScope,
    ) -> Self {
        Self {
            session,
            resolver,
            scope,
        }
    }

    /// A client whose calls also end when `token` is cancelled.
    pub fn with_cancellation(&self, token: &CancellationToken) -> Self {
        Self {
            session: self.session.clone(),
            resolver: self.resolver.clone(),
            scope: self.scope.with(token),
        }
    }

    /// Every child stored under the descriptor's node.
    ///
    /// Arrays yield their non-null elements; objects yield their values in
    /// key order. An absent node is an empty list.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        descriptor: &EntityDescriptor,
    ) -> Response<Vec<T>> {
        let result = self
            .scope
            .run("tree get_all", async {
                let path = self.resolver.resolve_tree(descriptor)?;
                let snapshot = self.session.snapshot(&path).await?;
                decode_list(&path, snapshot)
            })
            .await;
        respond("tree get_all", result)
    }

    /// The child `id` of the descriptor's node.
    pub async fn get_by_id<T: DeserializeOwned>(
        &self,
        descriptor: &EntityDescriptor,
        id: impl Into<EntityId>,
    ) -> Response<T> {
        let descriptor = descriptor.with_entity_id(id);
        let result = self
            .scope
            .run("tree get_by_id", async {
                let path = self.resolver.resolve_tree(&descriptor)?;
                match self.session.snapshot(&path).await? {
                    Some(value) => decode(&path, value),
                    None => Err(Error::NotFound(format!("Tree node {} is empty", path))),
                }
            })
            .await;
        respond("tree get_by_id", result)
    }

    /// Replace the node addressed by `descriptor`.
    pub async fn set<P: Serialize + ?Sized>(
        &self,
        descriptor: &EntityDescriptor,
        value: &P,
    ) -> Response<()> {
        let result = self
            .scope
            .run("tree set", async {
                let path = self.resolver.resolve_tree(descriptor)?;
                let value = serde_json::to_value(value)?;
                debug!("Writing tree node {}", path);
                self.session.set(&path, value).await
            })
            .await;
        respond("tree set", result)
    }

    /// Remove the node addressed by `descriptor` and everything below it.
    pub async fn remove(&self, descriptor: &EntityDescriptor) -> Response<()> {
        let result = self
            .scope
            .run("tree remove", async {
                let path = self.resolver.resolve_tree(descriptor)?;
                self.session.remove(&path).await
            })
            .await;
        respond("tree remove", result)
    }
}

fn decode<T: DeserializeOwned>(path: &StorePath, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        Error::MalformedPayload(format!("Tree node {} has wrong shape: {}", path, e))
    })
}

fn decode_list<T: DeserializeOwned>(path: &StorePath, snapshot: Option<Value>) -> Result<Vec<T>> {
    let children: Vec<Value> = match snapshot {
        None => return Ok(Vec::new()),
        Some(Value::Array(items)) => items.into_iter().filter(|v| !v.is_null()).collect(),
        Some(Value::Object(map)) => map.into_iter().map(|(_, v)| v).collect(),
        Some(other) => {
            return Err(Error::MalformedPayload(format!(
                "Tree node {} is not a list: found {}",
                path,
                json_type(&other)
            )))
        }
    };

    children
        .into_iter()
        .map(|child| decode(path, child))
        .collect()
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
