use async_trait::async_trait;
use tsplug_core::{ModelId, ModelState, TenantId};

use super::{ModelRecord, Result};

/// In-place edit applied under the store's per-record lock.
///
/// Returning an error aborts the update and leaves the record untouched.
pub type RecordMutation = Box<dyn FnOnce(&mut ModelRecord) -> Result<()> + Send>;

/// Metadata store for model records
///
/// Implementations must serialize `update` per `(tenant, id)`: the mutation
/// sees the latest committed record and nothing else writes it in between.
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Insert a new record
    async fn insert(&self, record: ModelRecord) -> Result<ModelRecord>;

    /// Get a record by tenant and ID
    async fn get(&self, tenant: &TenantId, id: &ModelId) -> Result<Option<ModelRecord>>;

    /// Atomically read-modify-write a record
    async fn update(
        &self,
        tenant: &TenantId,
        id: &ModelId,
        mutation: RecordMutation,
    ) -> Result<ModelRecord>;

    /// List a tenant's records, newest first
    async fn list(&self, tenant: &TenantId) -> Result<Vec<ModelRecord>>;

    /// Count records currently in Training for one instance of a tenant
    async fn count_training(&self, tenant: &TenantId, instance_id: &str) -> Result<usize> {
        Ok(self
            .list(tenant)
            .await?
            .iter()
            .filter(|r| r.instance_id == instance_id && r.state == ModelState::Training)
            .count())
    }
}
