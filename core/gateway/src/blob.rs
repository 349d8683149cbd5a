//! Blob client: streamed transfers between the blob store and local files.

use futures::StreamExt;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use unigate_common::{EntityDescriptor, Error, Response, Result};
use unigate_storage::{BlobMetadata, BlobStoreSession, PartFile};

use crate::cancel::{respond, CancelScope};
use crate::paths::LocalPathResolver;
use crate::resolver::AddressResolver;

#[derive(Clone)]
pub struct BlobClient {
    session: Arc<dyn BlobStoreSession>,
    resolver: Arc<AddressResolver>,
    paths: Arc<dyn LocalPathResolver>,
    scope: CancelScope,
}

impl BlobClient {
    pub fn new(
        session: Arc<dyn BlobStoreSession>,
        resolver: Arc<AddressResolver>,
        paths: Arc<dyn LocalPathResolver>,
        scope: CancelScope,
    ) -> Self {
        Self {
            session,
            resolver,
            paths,
            scope,
        }
    }

    /// Stream `local_path` to the blob addressed by `descriptor`.
    ///
    /// Cancelling `cancellation` drops the in-flight upload; the store only
    /// publishes an object once its stream has been fully consumed.
    pub async fn upload(
        &self,
        descriptor: &EntityDescriptor,
        local_path: impl AsRef<Path>,
        cancellation: &CancellationToken,
    ) -> Response<()> {
        let local_path = local_path.as_ref();
        let result = self
            .scope
            .with(cancellation)
            .run("blob upload", async {
                let remote = self.resolver.resolve_blob(descriptor)?;
                let file = fs::File::open(local_path).await.map_err(|e| {
                    if e.kind() == IoErrorKind::NotFound {
                        Error::NotFound(format!("Local file {} not found", local_path.display()))
                    } else {
                        Error::Io(e)
                    }
                })?;

                let stream = ReaderStream::new(file).map(|chunk| chunk.map_err(Error::from));
                let metadata = self.session.upload(&remote, Box::pin(stream)).await?;
                debug!("Uploaded {} bytes to {}", metadata.size, remote);
                Ok(())
            })
            .await;
        log_cancellation("upload", descriptor, &result);
        respond("blob upload", result)
    }

    /// Stream the blob addressed by `descriptor` into its local file.
    ///
    /// The file is written to a uniquely named `.part` sibling and renamed
    /// onto the target once complete, so concurrent downloads of the same
    /// blob never share a part file. A cancelled or failed download leaves
    /// no partial file behind.
    pub async fn download(
        &self,
        descriptor: &EntityDescriptor,
        cancellation: &CancellationToken,
    ) -> Response<PathBuf> {
        let result = self
            .scope
            .with(cancellation)
            .run("blob download", async {
                let remote = self.resolver.resolve_blob(descriptor)?;
                let target = self.paths.local_path(descriptor)?;
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).await?;
                }

                let mut stream = self.session.download(&remote).await?;
                let part = PartFile::unique(&target);
                let mut file = fs::File::create(part.path()).await?;
                let mut written = 0u64;
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk?;
                    file.write_all(&chunk).await?;
                    written += chunk.len() as u64;
                }
                file.flush().await?;
                drop(file);

                let path = part.commit().await?;
                debug!("Downloaded {} bytes from {} to {}", written, remote, path.display());
                Ok(path)
            })
            .await;
        log_cancellation("download", descriptor, &result);
        respond("blob download", result)
    }

    /// Whether the blob exists, judged by a metadata fetch.
    ///
    /// Any backend failure reads as `false`, so `false` does not prove the
    /// blob is absent. Resolution failures and cancellation are still errors.
    pub async fn exists(&self, descriptor: &EntityDescriptor) -> Response<bool> {
        let result: Result<bool> = async {
            self.scope.check("blob exists")?;
            let remote = self.resolver.resolve_blob(descriptor)?;
            match self.scope.run("blob exists", self.session.metadata(&remote)).await {
                Ok(_) => Ok(true),
                Err(Error::Cancelled(message)) => Err(Error::Cancelled(message)),
                Err(err) => {
                    debug!("Treating {} as absent: {}", remote, err);
                    Ok(false)
                }
            }
        }
        .await;
        respond("blob exists", result)
    }

    pub async fn metadata(&self, descriptor: &EntityDescriptor) -> Response<BlobMetadata> {
        let result = self
            .scope
            .run("blob metadata", async {
                let remote = self.resolver.resolve_blob(descriptor)?;
                self.session.metadata(&remote).await
            })
            .await;
        respond("blob metadata", result)
    }

    pub async fn delete(&self, descriptor: &EntityDescriptor) -> Response<()> {
        let result: Result<()> = async {
            self.scope.check("blob delete")?;
            let remote = self.resolver.resolve_blob(descriptor)?;
            self.session.delete(&remote).await
        }
        .await;
        respond("blob delete", result)
    }
}

fn log_cancellation<T>(direction: &str, descriptor: &EntityDescriptor, result: &Result<T>) {
    if let Err(Error::Cancelled(_)) = result {
        info!("Blob {} of {} cancelled", direction, descriptor);
    }
}
