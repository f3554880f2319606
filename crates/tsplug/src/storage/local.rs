use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tsplug_core::{ModelId, TenantId};

use super::traits::model_prefix;
use super::{ArtifactKey, ArtifactStore, StorageError, StorageResult};
use crate::config::ServiceConfig;

const STAGING_DIR: &str = ".staging";

/// Local filesystem artifact store
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    base_path: PathBuf,
}

impl LocalArtifactStore {
    /// Create a new LocalArtifactStore rooted at `base_path`
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Create LocalArtifactStore from ServiceConfig
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(&config.model_dir)
    }

    fn full_path(&self, key: &ArtifactKey) -> StorageResult<PathBuf> {
        Ok(self.base_path.join(key.relative_path()?))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn persist(&self, key: &ArtifactKey, source: &Path) -> StorageResult<()> {
        if !fs::metadata(source).await?.is_dir() {
            return Err(StorageError::InvalidPath(source.display().to_string()));
        }

        // Copy into a staging directory first so readers never observe a
        // half-written artifact
        let staging = self
            .base_path
            .join(STAGING_DIR)
            .join(uuid::Uuid::new_v4().to_string());
        if let Err(e) = copy_tree(source, &staging).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }

        let destination = self.full_path(key)?;
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).await?;
        }
        if fs::try_exists(&destination).await? {
            fs::remove_dir_all(&destination).await?;
        }
        fs::rename(&staging, &destination).await?;
        Ok(())
    }

    async fn fetch(&self, key: &ArtifactKey, destination: &Path) -> StorageResult<()> {
        let source = self.full_path(key)?;
        if !fs::try_exists(&source).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }
        copy_tree(&source, destination).await?;
        Ok(())
    }

    async fn exists(&self, key: &ArtifactKey) -> StorageResult<bool> {
        Ok(fs::try_exists(self.full_path(key)?).await?)
    }

    async fn remove_model(&self, tenant: &TenantId, model_id: &ModelId) -> StorageResult<()> {
        let path = self.base_path.join(model_prefix(tenant, model_id)?);
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Recursively copy the directory tree at `source` into `destination`
pub(crate) async fn copy_tree(source: &Path, destination: &Path) -> std::io::Result<()> {
    let mut pending = vec![(source.to_path_buf(), destination.to_path_buf())];

    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).await?;
        let mut read_dir = fs::read_dir(&from).await?;

        while let Some(entry) = read_dir.next_entry().await? {
            let target = to.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                pending.push((entry.path(), target));
            } else {
                fs::copy(entry.path(), &target).await?;
            }
        }
    }

    Ok(())
}
