//! Bounds the number of models in Training per owner
//!
//! The bound combines two views: the Training records currently in the
//! metadata store, and the permits this process has handed out but whose
//! jobs have not settled yet. Checks inside one process are serialized, so
//! the limit is strict locally. Separate processes only see each other
//! through the store, which keeps the limit soft across instances.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;
use tsplug_core::TenantId;

use crate::model::{ModelRepository, Result};

/// Logical owner that a training quota applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OwnerKey {
    pub tenant: TenantId,
    pub instance_id: String,
}

impl OwnerKey {
    pub fn new(tenant: TenantId, instance_id: impl Into<String>) -> Self {
        Self {
            tenant,
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.instance_id)
    }
}

type InFlight = Arc<Mutex<HashMap<OwnerKey, usize>>>;

#[derive(Clone)]
pub struct AdmissionController {
    repository: Arc<dyn ModelRepository>,
    limit: usize,
    in_flight: InFlight,
}

impl AdmissionController {
    pub fn new(repository: Arc<dyn ModelRepository>, limit: usize) -> Self {
        Self {
            repository,
            limit,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Try to reserve a training slot for `owner`.
    ///
    /// Returns `None` when the owner is at or over the limit; nothing is
    /// reserved in that case.
    pub async fn try_admit(&self, owner: &OwnerKey) -> Result<Option<AdmissionPermit>> {
        let stored = self
            .repository
            .count_training(&owner.tenant, &owner.instance_id)
            .await?;

        let mut in_flight = lock(&self.in_flight);
        let local = in_flight.get(owner).copied().unwrap_or(0);
        let current = stored.max(local);
        if current >= self.limit {
            debug!(owner = %owner, current, limit = self.limit, "admission rejected");
            return Ok(None);
        }

        *in_flight.entry(owner.clone()).or_insert(0) += 1;
        Ok(Some(AdmissionPermit {
            owner: owner.clone(),
            in_flight: self.in_flight.clone(),
        }))
    }

    /// Permits currently held for `owner`
    pub fn in_flight(&self, owner: &OwnerKey) -> usize {
        lock(&self.in_flight).get(owner).copied().unwrap_or(0)
    }
}

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashMap<OwnerKey, usize>> {
    // The map holds plain counters, so a poisoned guard is still consistent
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A reserved training slot, released on drop
#[derive(Debug)]
pub struct AdmissionPermit {
    owner: OwnerKey,
    in_flight: InFlight,
}

impl AdmissionPermit {
    pub fn owner(&self) -> &OwnerKey {
        &self.owner
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let mut in_flight = lock(&self.in_flight);
        if let Some(count) = in_flight.get_mut(&self.owner) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                in_flight.remove(&self.owner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InMemoryModelRepository, ModelRecord};
    use tsplug_core::Fingerprint;

    fn owner(instance: &str) -> OwnerKey {
        OwnerKey::new(TenantId::default(), instance)
    }

    #[tokio::test]
    async fn test_permits_bound_in_flight_jobs() {
        let repo = Arc::new(InMemoryModelRepository::new());
        let admission = AdmissionController::new(repo, 2);

        let first = admission.try_admit(&owner("I1")).await.unwrap();
        let second = admission.try_admit(&owner("I1")).await.unwrap();
        assert!(first.is_some() && second.is_some());
        assert!(admission.try_admit(&owner("I1")).await.unwrap().is_none());

        // Other owners have their own quota
        assert!(admission.try_admit(&owner("I2")).await.unwrap().is_some());

        drop(first);
        assert_eq!(admission.in_flight(&owner("I1")), 1);
        assert!(admission.try_admit(&owner("I1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_stored_training_records_count() {
        let repo = Arc::new(InMemoryModelRepository::new());
        let record = ModelRecord::new_training(
            TenantId::default(),
            "I1",
            Fingerprint::from_string("f"),
        );
        repo.insert(record).await.unwrap();

        let admission = AdmissionController::new(repo, 1);
        assert!(admission.try_admit(&owner("I1")).await.unwrap().is_none());
        assert_eq!(admission.in_flight(&owner("I1")), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_rejects_everything() {
        let repo = Arc::new(InMemoryModelRepository::new());
        let admission = AdmissionController::new(repo, 0);
        assert!(admission.try_admit(&owner("I1")).await.unwrap().is_none());
    }
}
