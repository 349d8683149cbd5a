//! Local filesystem backends.

pub mod blob;
pub mod document;

pub use blob::LocalBlobStore;
pub use document::LocalDocumentStore;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use unigate_common::{Result, StorePath};

/// Map a store path below `root`.
pub(crate) fn to_fs_path(root: &Path, path: &StorePath) -> PathBuf {
    let mut fs_path = root.to_path_buf();
    for component in path.components() {
        fs_path.push(component);
    }
    fs_path
}

/// Append `suffix` to the final component without touching any existing extension.
pub(crate) fn with_suffix(target: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(target.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Partially written file that replaces its target on commit.
///
/// Content is written to a sibling `.part` file and renamed into place
/// once complete. Dropping an uncommitted `PartFile` removes the partial
/// file, so abandoned or cancelled transfers leave nothing behind.
#[derive(Debug)]
pub struct PartFile {
    part: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartFile {
    /// Stage writes for `target` in `<target>.part`.
    pub fn for_target(target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        Self {
            part: with_suffix(&target, ".part"),
            target,
            committed: false,
        }
    }

    /// Stage writes in a uniquely named part file, for concurrent writers.
    pub fn unique(target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        let suffix = format!(".{}.part", Uuid::new_v4().simple());
        Self {
            part: with_suffix(&target, &suffix),
            target,
            committed: false,
        }
    }

    /// Where content should be written.
    pub fn path(&self) -> &Path {
        &self.part
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Move the part file over the target.
    pub async fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.part, &self.target).await?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.part);
        }
    }
}
