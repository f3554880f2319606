use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tsplug_core::{ModelId, ModelState, TenantId};

use crate::model::{ModelError, ModelRecord, ModelRepository};

#[derive(Error, Debug)]
pub enum ProgressError {
    /// The model left Training underneath the job, typically a delete
    #[error("Training cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Repository(ModelError),
}

/// Lets a running training job persist intermediate state.
///
/// Every checkpoint refreshes the record's `updated_at`, which also keeps
/// the record clear of stale-Training expiry.
#[derive(Clone)]
pub struct TrainingProgress {
    repository: Arc<dyn ModelRepository>,
    tenant: TenantId,
    model_id: ModelId,
}

impl TrainingProgress {
    pub fn new(repository: Arc<dyn ModelRepository>, tenant: TenantId, model_id: ModelId) -> Self {
        Self {
            repository,
            tenant,
            model_id,
        }
    }

    pub fn tenant(&self) -> &TenantId {
        &self.tenant
    }

    pub fn model_id(&self) -> &ModelId {
        &self.model_id
    }

    /// Record that training is still running, optionally replacing the
    /// record's backend context
    pub async fn checkpoint(&self, context: Option<Value>) -> Result<(), ProgressError> {
        let mutation = Box::new(move |record: &mut ModelRecord| {
            if record.state != ModelState::Training {
                return Err(ModelError::Rejected(format!("model is {}", record.state)));
            }
            record.transition(ModelState::Training)?;
            if let Some(context) = context {
                record.context = Some(context);
            }
            Ok(())
        });

        match self
            .repository
            .update(&self.tenant, &self.model_id, mutation)
            .await
        {
            Ok(_) => Ok(()),
            Err(ModelError::NotFound(id)) => {
                Err(ProgressError::Cancelled(format!("model {} not found", id)))
            }
            Err(ModelError::Rejected(reason)) => Err(ProgressError::Cancelled(reason)),
            Err(e) => Err(ProgressError::Repository(e)),
        }
    }
}
