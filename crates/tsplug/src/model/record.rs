use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tsplug_core::{Fingerprint, ModelId, ModelState, TenantId, TimeKey};

use super::Result;

/// Metadata record of one model, keyed by `(tenant, id)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub tenant: TenantId,
    pub id: ModelId,
    /// Instance that requested training; admission is counted per instance
    pub instance_id: String,
    pub state: ModelState,
    pub fingerprint: Fingerprint,
    pub time_key: TimeKey,
    /// Backend-specific payload, e.g. a serialized remote job handle
    pub context: Option<serde_json::Value>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelRecord {
    /// A freshly accepted model, in the initial Training state
    pub fn new_training(
        tenant: TenantId,
        instance_id: impl Into<String>,
        fingerprint: Fingerprint,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant,
            id: ModelId::new(),
            instance_id: instance_id.into(),
            state: ModelState::INITIAL,
            fingerprint,
            time_key: TimeKey::now(),
            context: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move along a lifecycle edge, refreshing `updated_at`
    pub fn transition(&mut self, next: ModelState) -> Result<()> {
        self.state = self.state.transition(next)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn is_deleted(&self) -> bool {
        self.state == ModelState::Deleted
    }

    pub fn summary(&self) -> ModelSummary {
        ModelSummary {
            model_id: self.id.to_string(),
            instance_id: self.instance_id.clone(),
            state: self.state,
            time_key: self.time_key.to_string(),
            last_error: self.last_error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Listing view of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub model_id: String,
    pub instance_id: String,
    pub state: ModelState,
    pub time_key: String,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
