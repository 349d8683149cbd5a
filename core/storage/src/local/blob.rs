//! Local filesystem blob store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::debug;

use unigate_common::{Error, Result, StorePath};

use super::{to_fs_path, PartFile};
use crate::session::{BlobMetadata, BlobStoreSession, ByteStream};

/// Local filesystem blob store.
///
/// Stores each object as a file below a root directory.
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Create a new local blob store with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Invalid path
    /// - Permission denied
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn create_metadata(&self, path: &StorePath, fs_meta: std::fs::Metadata) -> BlobMetadata {
        let updated: DateTime<Utc> = fs_meta
            .modified()
            .map(|t| t.into())
            .unwrap_or_else(|_| Utc::now());

        BlobMetadata {
            path: path.clone(),
            size: fs_meta.len(),
            updated,
            etag: Some(format!("{}-{}", updated.timestamp(), fs_meta.len())),
        }
    }

    async fn file_metadata(&self, path: &StorePath) -> Result<(PathBuf, std::fs::Metadata)> {
        let fs_path = to_fs_path(&self.root, path);
        let fs_meta = match fs::metadata(&fs_path).await {
            Ok(meta) => meta,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotFound(format!("Blob not found: {}", path)));
            }
            Err(err) => return Err(err.into()),
        };

        if !fs_meta.is_file() {
            return Err(Error::NotFound(format!("Not a blob: {}", path)));
        }
        Ok((fs_path, fs_meta))
    }
}

#[async_trait]
impl BlobStoreSession for LocalBlobStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        debug!("Local blob store ready at {}", self.root.display());
        Ok(())
    }

    async fn upload(&self, path: &StorePath, mut stream: ByteStream) -> Result<BlobMetadata> {
        if path.is_root() {
            return Err(Error::InvalidInput("Cannot upload to the root path".to_string()));
        }

        let fs_path = to_fs_path(&self.root, path);
        if let Some(parent) = fs_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let part = PartFile::unique(&fs_path);
        let mut file = fs::File::create(part.path()).await?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        drop(file);

        part.commit().await?;

        let fs_meta = fs::metadata(&fs_path).await?;
        Ok(self.create_metadata(path, fs_meta))
    }

    async fn download(&self, path: &StorePath) -> Result<ByteStream> {
        let (fs_path, _) = self.file_metadata(path).await?;
        let file = fs::File::open(&fs_path).await?;

        let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(Error::from));
        Ok(Box::pin(stream))
    }

    async fn metadata(&self, path: &StorePath) -> Result<BlobMetadata> {
        let (_, fs_meta) = self.file_metadata(path).await?;
        Ok(self.create_metadata(path, fs_meta))
    }

    async fn delete(&self, path: &StorePath) -> Result<()> {
        let (fs_path, _) = self.file_metadata(path).await?;
        fs::remove_file(&fs_path).await?;
        Ok(())
    }
}
