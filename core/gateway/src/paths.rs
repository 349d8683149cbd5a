//! Local file locations for blob transfers.

use std::path::{Path, PathBuf};

use unigate_common::{EntityDescriptor, Result};

/// Maps a descriptor to the local file a download lands in.
pub trait LocalPathResolver: Send + Sync {
    fn local_path(&self, descriptor: &EntityDescriptor) -> Result<PathBuf>;
}

/// Places files at `<base>/<kind>/<id>`, or `<base>/<kind>` without an id.
#[derive(Debug, Clone)]
pub struct DirectoryPathResolver {
    base: PathBuf,
}

impl DirectoryPathResolver {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// `<cache dir>/unigate/downloads`, or the temp dir when the platform
    /// has no cache dir.
    pub fn default_base() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("unigate")
            .join("downloads")
    }

    pub fn base(&self) -> &Path {
        &self.base
    }
}

impl Default for DirectoryPathResolver {
    fn default() -> Self {
        Self::new(Self::default_base())
    }
}

impl LocalPathResolver for DirectoryPathResolver {
    fn local_path(&self, descriptor: &EntityDescriptor) -> Result<PathBuf> {
        let mut path = self.base.join(descriptor.kind.as_str());
        if let Some(id) = &descriptor.id {
            path.push(id.to_segment()?);
        }
        Ok(path)
    }
}
