use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tsplug_core::{ModelId, TenantId, TimeKey};

use super::{StorageError, StorageResult};

/// Location of one trained artifact: `{tenant}/{model_id}/{time_key}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub tenant: TenantId,
    pub model_id: ModelId,
    pub time_key: TimeKey,
}

impl ArtifactKey {
    pub fn new(tenant: TenantId, model_id: ModelId, time_key: TimeKey) -> Self {
        Self {
            tenant,
            model_id,
            time_key,
        }
    }

    /// Relative path of the artifact below a storage root
    pub fn relative_path(&self) -> StorageResult<PathBuf> {
        Ok(model_prefix(&self.tenant, &self.model_id)?.join(checked_segment(self.time_key.as_str())?))
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tenant, self.model_id, self.time_key)
    }
}

/// Relative directory holding every artifact version of a model
pub fn model_prefix(tenant: &TenantId, model_id: &ModelId) -> StorageResult<PathBuf> {
    Ok(PathBuf::from(checked_segment(tenant.as_str())?).join(checked_segment(model_id.as_str())?))
}

/// Reject anything that could escape the storage root
pub(crate) fn checked_segment(segment: &str) -> StorageResult<&str> {
    let valid = !segment.is_empty()
        && segment != "."
        && segment != ".."
        && !segment.contains(['/', '\\', '\0']);
    if valid {
        Ok(segment)
    } else {
        Err(StorageError::InvalidPath(segment.to_string()))
    }
}

/// Durable storage for trained model artifacts
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Persist the contents of `source` as the artifact for `key`
    async fn persist(&self, key: &ArtifactKey, source: &Path) -> StorageResult<()>;

    /// Copy the artifact for `key` into `destination`
    async fn fetch(&self, key: &ArtifactKey, destination: &Path) -> StorageResult<()>;

    /// Check if an artifact exists
    async fn exists(&self, key: &ArtifactKey) -> StorageResult<bool>;

    /// Remove every artifact version of a model
    async fn remove_model(&self, tenant: &TenantId, model_id: &ModelId) -> StorageResult<()>;
}
