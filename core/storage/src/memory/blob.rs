//! In-memory blob store.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::{stream, StreamExt};
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use unigate_common::{Error, Result, StorePath};

use super::poisoned;
use crate::session::{BlobMetadata, BlobStoreSession, ByteStream};

/// Chunk size used when streaming downloads.
const DOWNLOAD_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredBlob {
    data: Bytes,
    metadata: BlobMetadata,
}

/// In-memory blob store.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn path_to_key(path: &StorePath) -> String {
        path.to_string_path()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStoreSession for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn initialize(&self) -> Result<()> {
        debug!("Memory blob store ready");
        Ok(())
    }

    async fn upload(&self, path: &StorePath, mut stream: ByteStream) -> Result<BlobMetadata> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot upload to the root path".to_string()));
        }

        let mut data = Vec::new();
        while let Some(chunk) = stream.next().await {
            data.extend_from_slice(&chunk?);
        }

        let metadata = BlobMetadata {
            path: path.clone(),
            size: data.len() as u64,
            updated: Utc::now(),
            etag: Some(Uuid::new_v4().to_string()),
        };

        let blob = StoredBlob {
            data: Bytes::from(data),
            metadata: metadata.clone(),
        };
        self.blobs
            .write()
            .map_err(poisoned)?
            .insert(Self::path_to_key(path), blob);

        Ok(metadata)
    }

    async fn download(&self, path: &StorePath) -> Result<ByteStream> {
        let data = {
            let blobs = self.blobs.read().map_err(poisoned)?;
            match blobs.get(&Self::path_to_key(path)) {
                Some(blob) => blob.data.clone(),
                None => return Err(Error::NotFound(format!("Blob not found: {}", path))),
            }
        };

        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(DOWNLOAD_CHUNK_SIZE)
            .map(|start| {
                let end = (start + DOWNLOAD_CHUNK_SIZE).min(data.len());
                Ok(data.slice(start..end))
            })
            .collect();

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn metadata(&self, path: &StorePath) -> Result<BlobMetadata> {
        let blobs = self.blobs.read().map_err(poisoned)?;
        blobs
            .get(&Self::path_to_key(path))
            .map(|blob| blob.metadata.clone())
            .ok_or_else(|| Error::NotFound(format!("Blob not found: {}", path)))
    }

    async fn delete(&self, path: &StorePath) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(poisoned)?;
        match blobs.remove(&Self::path_to_key(path)) {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("Blob not found: {}", path))),
        }
    }
}
