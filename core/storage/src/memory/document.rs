//! In-memory document store.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use unigate_common::{Result, StorePath};

use super::poisoned;
use crate::session::{DocumentStoreSession, DocumentWrite};

/// Length of allocated document identifiers.
pub(crate) const GENERATED_ID_LEN: usize = 20;

/// Generate a random identifier for a new document.
pub(crate) fn generate_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(GENERATED_ID_LEN);
    id
}

/// In-memory document store.
///
/// Commits stage every write against a private copy of the affected
/// documents and only publish once all of them applied cleanly.
pub struct MemoryDocumentStore {
    documents: RwLock<BTreeMap<String, Value>>,
}

impl MemoryDocumentStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.read().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn path_to_key(path: &StorePath) -> String {
        path.to_string_path()
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStoreSession for MemoryDocumentStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<()> {
        debug!("Memory document store ready");
        Ok(())
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>> {
        let key = Self::path_to_key(path);
        let documents = self.documents.read().map_err(poisoned)?;
        Ok(documents.get(&key).cloned())
    }

    async fn allocate_id(&self, collection: &StorePath) -> Result<String> {
        let documents = self.documents.read().map_err(poisoned)?;
        loop {
            let id = generate_id();
            let key = Self::path_to_key(&collection.join(&id)?);
            if !documents.contains_key(&key) {
                return Ok(id);
            }
        }
    }

    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<()> {
        let mut documents = self.documents.write().map_err(poisoned)?;
        let mut staged: HashMap<String, Option<Value>> = HashMap::new();

        for write in &writes {
            let key = Self::path_to_key(write.path());
            let current = match staged.get(&key) {
                Some(value) => value.clone(),
                None => documents.get(&key).cloned(),
            };
            let next = write.apply(current)?;
            staged.insert(key, next);
        }

        for (key, value) in staged {
            match value {
                Some(value) => {
                    documents.insert(key, value);
                }
                None => {
                    documents.remove(&key);
                }
            }
        }

        debug!("Committed {} document writes", writes.len());
        Ok(())
    }
}
