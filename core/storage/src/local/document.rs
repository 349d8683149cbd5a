//! Local filesystem document store.
//!
//! Documents live as `<root>/<collection>/<id>.json`.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use unigate_common::{Error, Result, StorePath};

use super::{to_fs_path, with_suffix};
use crate::memory::document::generate_id;
use crate::memory::poisoned;
use crate::session::{DocumentStoreSession, DocumentWrite};

const DOCUMENT_SUFFIX: &str = ".json";

/// Local filesystem document store.
///
/// A commit first writes every new document to a temp file. Only once all
/// of them are on disk are they renamed over their targets, and a failed
/// rename restores the targets already replaced.
pub struct LocalDocumentStore {
    root: PathBuf,
    /// Serializes commits.
    commit_lock: Arc<Mutex<()>>,
}

/// One document change written to disk but not yet visible.
struct StagedWrite {
    target: PathBuf,
    /// New content. `None` deletes the target.
    temp: Option<PathBuf>,
    /// Content before the commit.
    original: Option<Vec<u8>>,
}

impl StagedWrite {
    fn publish(&self) -> Result<()> {
        match &self.temp {
            Some(temp) => std::fs::rename(temp, &self.target)?,
            None => remove_if_present(&self.target)?,
        }
        Ok(())
    }

    fn restore(&self) {
        let result = match &self.original {
            Some(bytes) => std::fs::write(&self.target, bytes),
            None => remove_if_present(&self.target),
        };
        if let Err(err) = result {
            warn!("Failed to restore {}: {}", self.target.display(), err);
        }
    }

    fn discard(&self) {
        if let Some(temp) = &self.temp {
            let _ = std::fs::remove_file(temp);
        }
    }
}

fn remove_if_present(file: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(file) {
        Err(err) if err.kind() != ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}

impl LocalDocumentStore {
    /// Create a new store rooted at `root`.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            root,
            commit_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn document_file(root: &Path, path: &StorePath) -> Result<PathBuf> {
        if path.is_root() {
            return Err(Error::InvalidInput(
                "Document path cannot be the root".to_string(),
            ));
        }
        Ok(with_suffix(&to_fs_path(root, path), DOCUMENT_SUFFIX))
    }

    fn read_raw(file: &Path) -> Result<Option<Vec<u8>>> {
        match std::fs::read(file) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn stage(
        target: PathBuf,
        original: Option<Vec<u8>>,
        value: Option<Value>,
    ) -> Result<StagedWrite> {
        let temp = match value {
            Some(value) => {
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let temp = with_suffix(&target, &format!(".{}.tmp", Uuid::new_v4().simple()));
                if let Err(err) = std::fs::write(&temp, serde_json::to_vec_pretty(&value)?) {
                    let _ = std::fs::remove_file(&temp);
                    return Err(err.into());
                }
                Some(temp)
            }
            None => None,
        };
        Ok(StagedWrite {
            target,
            temp,
            original,
        })
    }

    /// Make staged writes visible in order. On failure the writes already
    /// published are rolled back and the rest discarded.
    fn publish_all(staged: &[StagedWrite]) -> Result<()> {
        for (index, write) in staged.iter().enumerate() {
            if let Err(err) = write.publish() {
                warn!(
                    "Commit failed at {}, rolling back: {}",
                    write.target.display(),
                    err
                );
                staged[..index].iter().rev().for_each(StagedWrite::restore);
                staged[index..].iter().for_each(StagedWrite::discard);
                return Err(err);
            }
        }
        Ok(())
    }

    fn commit_blocking(root: &Path, lock: &Mutex<()>, writes: &[DocumentWrite]) -> Result<()> {
        let _guard = lock.lock().map_err(poisoned)?;
        let mut originals: HashMap<PathBuf, Option<Vec<u8>>> = HashMap::new();
        let mut staged: HashMap<PathBuf, Option<Value>> = HashMap::new();
        let mut order: Vec<PathBuf> = Vec::new();

        // Validate every write before touching the disk.
        for write in writes {
            let file = Self::document_file(root, write.path())?;
            let current = match staged.get(&file) {
                Some(value) => value.clone(),
                None => {
                    let raw = Self::read_raw(&file)?;
                    let parsed = match &raw {
                        Some(bytes) => Some(serde_json::from_slice::<Value>(bytes)?),
                        None => None,
                    };
                    originals.insert(file.clone(), raw);
                    order.push(file.clone());
                    parsed
                }
            };
            let next = write.apply(current)?;
            staged.insert(file, next);
        }

        let mut prepared = Vec::with_capacity(order.len());
        for file in order {
            let original = originals.remove(&file).flatten();
            let next = staged.remove(&file).flatten();
            match Self::stage(file, original, next) {
                Ok(write) => prepared.push(write),
                Err(err) => {
                    prepared.iter().for_each(StagedWrite::discard);
                    return Err(err);
                }
            }
        }

        Self::publish_all(&prepared)
    }
}

#[async_trait]
impl DocumentStoreSession for LocalDocumentStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        debug!("Local document store ready at {}", self.root.display());
        Ok(())
    }

    async fn get(&self, path: &StorePath) -> Result<Option<Value>> {
        let file = Self::document_file(&self.root, path)?;
        match fs::read(&file).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn allocate_id(&self, collection: &StorePath) -> Result<String> {
        loop {
            let id = generate_id();
            let file = Self::document_file(&self.root, &collection.join(&id)?)?;
            if !fs::try_exists(&file).await? {
                return Ok(id);
            }
        }
    }

    async fn commit(&self, writes: Vec<DocumentWrite>) -> Result<()> {
        let root = self.root.clone();
        let lock = Arc::clone(&self.commit_lock);
        let count = writes.len();

        tokio::task::spawn_blocking(move || Self::commit_blocking(&root, &lock, &writes))
            .await
            .map_err(|e| Error::Transport(format!("Commit task failed: {}", e)))??;

        debug!("Committed {} document writes to disk", count);
        Ok(())
    }
}
