use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::debug;
use tsplug_core::{ModelId, TenantId};

use super::traits::model_prefix;
use super::{ArtifactKey, ArtifactStore, StorageResult};

/// Local materialization of durable artifacts for inference
///
/// Each artifact version is fetched once into `{cache_dir}/{tenant}/{model}/{time_key}`
/// and reused by later inference jobs until a refresh is forced.
#[derive(Clone)]
pub struct ArtifactCache {
    store: Arc<dyn ArtifactStore>,
    cache_dir: PathBuf,
}

impl ArtifactCache {
    pub fn new(store: Arc<dyn ArtifactStore>, cache_dir: impl AsRef<Path>) -> Self {
        Self {
            store,
            cache_dir: cache_dir.as_ref().to_path_buf(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Make the artifact for `key` available locally and return its path.
    ///
    /// With `force`, any cached copy is discarded and fetched again.
    pub async fn prepare(&self, key: &ArtifactKey, force: bool) -> StorageResult<PathBuf> {
        let path = self.cache_dir.join(key.relative_path()?);
        let cached = fs::try_exists(&path).await?;
        if cached && !force {
            return Ok(path);
        }
        if cached {
            fs::remove_dir_all(&path).await?;
        }

        debug!(artifact = %key, force, "materializing model artifact");
        let staging = self
            .cache_dir
            .join(format!(".fetch-{}", uuid::Uuid::new_v4()));
        if let Err(e) = self.store.fetch(key, &staging).await {
            let _ = fs::remove_dir_all(&staging).await;
            return Err(e);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        // A concurrent prepare may have won the race; its copy is equivalent
        if fs::rename(&staging, &path).await.is_err() {
            let _ = fs::remove_dir_all(&staging).await;
        }
        Ok(path)
    }

    /// Drop every cached version of a model
    pub async fn evict_model(&self, tenant: &TenantId, model_id: &ModelId) -> StorageResult<()> {
        let path = self.cache_dir.join(model_prefix(tenant, model_id)?);
        match fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{LocalArtifactStore, StorageError};
    use tempfile::TempDir;
    use tsplug_core::TimeKey;

    fn key() -> ArtifactKey {
        ArtifactKey::new(
            TenantId::from_string("Official"),
            ModelId::from_string("m1"),
            TimeKey::from_string("t1"),
        )
    }

    async fn setup(dir: &TempDir) -> (ArtifactCache, PathBuf) {
        let store = Arc::new(LocalArtifactStore::new(dir.path().join("models")));
        let ws = dir.path().join("ws");
        fs::create_dir_all(&ws).await.unwrap();
        fs::write(ws.join("model.bin"), b"v1").await.unwrap();
        store.persist(&key(), &ws).await.unwrap();
        (ArtifactCache::new(store, dir.path().join("cache")), ws)
    }

    #[tokio::test]
    async fn test_prepare_reuses_cached_copy() {
        let dir = TempDir::new().unwrap();
        let (cache, ws) = setup(&dir).await;

        let path = cache.prepare(&key(), false).await.unwrap();
        assert_eq!(fs::read(path.join("model.bin")).await.unwrap(), b"v1");

        // A newer durable copy is not picked up without force
        fs::write(ws.join("model.bin"), b"v2").await.unwrap();
        cache.store().persist(&key(), &ws).await.unwrap();
        let path = cache.prepare(&key(), false).await.unwrap();
        assert_eq!(fs::read(path.join("model.bin")).await.unwrap(), b"v1");

        let path = cache.prepare(&key(), true).await.unwrap();
        assert_eq!(fs::read(path.join("model.bin")).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_prepare_heals_corrupted_cache() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = setup(&dir).await;

        let path = cache.prepare(&key(), false).await.unwrap();
        fs::remove_file(path.join("model.bin")).await.unwrap();

        let path = cache.prepare(&key(), true).await.unwrap();
        assert!(path.join("model.bin").exists());
    }

    #[tokio::test]
    async fn test_prepare_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(LocalArtifactStore::new(dir.path().join("models")));
        let cache = ArtifactCache::new(store, dir.path().join("cache"));
        let result = cache.prepare(&key(), false).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_evict_model() {
        let dir = TempDir::new().unwrap();
        let (cache, _) = setup(&dir).await;
        let path = cache.prepare(&key(), false).await.unwrap();

        cache
            .evict_model(&TenantId::from_string("Official"), &ModelId::from_string("m1"))
            .await
            .unwrap();
        assert!(!path.exists());
    }
}
