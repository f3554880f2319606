use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tsplug_core::{ModelId, TenantId};

use super::{ModelError, ModelRecord, ModelRepository, RecordMutation, Result};

/// In-memory implementation of ModelRepository
#[derive(Clone, Default)]
pub struct InMemoryModelRepository {
    records: Arc<RwLock<HashMap<(TenantId, ModelId), ModelRecord>>>,
}

impl InMemoryModelRepository {
    /// Create a new in-memory model repository
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModelRepository for InMemoryModelRepository {
    async fn insert(&self, record: ModelRecord) -> Result<ModelRecord> {
        let mut records = self.records.write().await;
        let key = (record.tenant.clone(), record.id.clone());

        if records.contains_key(&key) {
            return Err(ModelError::AlreadyExists(record.id.to_string()));
        }

        records.insert(key, record.clone());
        Ok(record)
    }

    async fn get(&self, tenant: &TenantId, id: &ModelId) -> Result<Option<ModelRecord>> {
        let records = self.records.read().await;
        Ok(records.get(&(tenant.clone(), id.clone())).cloned())
    }

    async fn update(
        &self,
        tenant: &TenantId,
        id: &ModelId,
        mutation: RecordMutation,
    ) -> Result<ModelRecord> {
        let mut records = self.records.write().await;
        let current = records
            .get_mut(&(tenant.clone(), id.clone()))
            .ok_or_else(|| ModelError::NotFound(id.to_string()))?;

        // Work on a copy so a failed mutation leaves no partial edit behind
        let mut next = current.clone();
        mutation(&mut next)?;
        *current = next.clone();
        Ok(next)
    }

    async fn list(&self, tenant: &TenantId) -> Result<Vec<ModelRecord>> {
        let records = self.records.read().await;
        let mut list: Vec<ModelRecord> = records
            .values()
            .filter(|r| &r.tenant == tenant)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsplug_core::{Fingerprint, ModelState};

    fn record(tenant: &str, instance: &str) -> ModelRecord {
        ModelRecord::new_training(
            TenantId::from_string(tenant),
            instance,
            Fingerprint::from_string("fp"),
        )
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = InMemoryModelRepository::new();
        let created = repo.insert(record("t1", "i1")).await.unwrap();

        let retrieved = repo
            .get(&created.tenant, &created.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retrieved, created);

        // Same id under another tenant is a different record
        let other = repo
            .get(&TenantId::from_string("t2"), &created.id)
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_error() {
        let repo = InMemoryModelRepository::new();
        let created = repo.insert(record("t1", "i1")).await.unwrap();
        let result = repo.insert(created).await;
        assert!(matches!(result, Err(ModelError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn test_update_applies_mutation() {
        let repo = InMemoryModelRepository::new();
        let created = repo.insert(record("t1", "i1")).await.unwrap();

        let updated = repo
            .update(
                &created.tenant,
                &created.id,
                Box::new(|r: &mut ModelRecord| r.transition(ModelState::Ready)),
            )
            .await
            .unwrap();
        assert_eq!(updated.state, ModelState::Ready);

        let stored = repo.get(&created.tenant, &created.id).await.unwrap().unwrap();
        assert_eq!(stored.state, ModelState::Ready);
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_record_untouched() {
        let repo = InMemoryModelRepository::new();
        let created = repo.insert(record("t1", "i1")).await.unwrap();

        let result = repo
            .update(
                &created.tenant,
                &created.id,
                Box::new(|r: &mut ModelRecord| {
                    r.last_error = Some("partial".to_string());
                    Err(ModelError::Rejected("nope".to_string()))
                }),
            )
            .await;
        assert!(matches!(result, Err(ModelError::Rejected(_))));

        let stored = repo.get(&created.tenant, &created.id).await.unwrap().unwrap();
        assert_eq!(stored, created);
    }

    #[tokio::test]
    async fn test_update_missing_record() {
        let repo = InMemoryModelRepository::new();
        let result = repo
            .update(
                &TenantId::default(),
                &ModelId::new(),
                Box::new(|_: &mut ModelRecord| Ok(())),
            )
            .await;
        assert!(matches!(result, Err(ModelError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_and_count_training() {
        let repo = InMemoryModelRepository::new();
        let a = repo.insert(record("t1", "i1")).await.unwrap();
        repo.insert(record("t1", "i1")).await.unwrap();
        repo.insert(record("t1", "i2")).await.unwrap();
        repo.insert(record("t2", "i1")).await.unwrap();

        let tenant = TenantId::from_string("t1");
        assert_eq!(repo.list(&tenant).await.unwrap().len(), 3);
        assert_eq!(repo.count_training(&tenant, "i1").await.unwrap(), 2);

        repo.update(&tenant, &a.id, Box::new(|r: &mut ModelRecord| r.transition(ModelState::Failed)))
            .await
            .unwrap();
        assert_eq!(repo.count_training(&tenant, "i1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let repo = InMemoryModelRepository::new();
        let mut older = record("t1", "i1");
        older.created_at -= chrono::Duration::seconds(10);
        let older = repo.insert(older).await.unwrap();
        let newer = repo.insert(record("t1", "i1")).await.unwrap();

        let list = repo.list(&TenantId::from_string("t1")).await.unwrap();
        assert_eq!(list[0].id, newer.id);
        assert_eq!(list[1].id, older.id);
    }
}
