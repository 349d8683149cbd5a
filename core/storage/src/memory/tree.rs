//! In-memory hierarchical key/value store.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::RwLock;
use tracing::debug;

use unigate_common::{Error, Result, StorePath};

use super::poisoned;
use crate::session::TreeStoreSession;

/// In-memory tree store holding one JSON document rooted at `/`.
pub struct MemoryTreeStore {
    root: RwLock<Value>,
}

impl MemoryTreeStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    /// Create a store seeded with `root`.
    pub fn from_value(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
        }
    }

    /// Walk to the node at `path`. Array children are addressed by index.
    fn lookup<'a>(node: &'a Value, path: &StorePath) -> Option<&'a Value> {
        let mut current = node;
        for segment in path.components() {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

impl Default for MemoryTreeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TreeStoreSession for MemoryTreeStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<()> {
        debug!("Memory tree store ready");
        Ok(())
    }

    async fn snapshot(&self, path: &StorePath) -> Result<Option<Value>> {
        let root = self.root.read().map_err(poisoned)?;
        Ok(Self::lookup(&root, path)
            .filter(|value| !value.is_null())
            .cloned())
    }

    async fn set(&self, path: &StorePath, value: Value) -> Result<()> {
        if value.is_null() {
            return self.remove(path).await;
        }

        let mut root = self.root.write().map_err(poisoned)?;
        let Some((last, parents)) = path.components().split_last() else {
            *root = value;
            return Ok(());
        };

        let mut current = &mut *root;
        for segment in parents {
            if !current.is_object() {
                *current = Value::Object(Map::new());
            }
            current = match current.as_object_mut() {
                Some(map) => map
                    .entry(segment.clone())
                    .or_insert_with(|| Value::Object(Map::new())),
                None => {
                    return Err(Error::InvalidInput(format!("Cannot write below {}", path)));
                }
            };
        }

        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        if let Value::Object(map) = current {
            map.insert(last.clone(), value);
        }
        Ok(())
    }

    async fn remove(&self, path: &StorePath) -> Result<()> {
        let mut root = self.root.write().map_err(poisoned)?;
        let Some((last, parents)) = path.components().split_last() else {
            *root = Value::Object(Map::new());
            return Ok(());
        };

        let mut current = &mut *root;
        for segment in parents {
            current = match current {
                Value::Object(map) => match map.get_mut(segment) {
                    Some(child) => child,
                    None => return Ok(()),
                },
                _ => return Ok(()),
            };
        }

        if let Value::Object(map) = current {
            map.remove(last);
        }
        Ok(())
    }
}
