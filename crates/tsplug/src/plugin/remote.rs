//! Remote async compute
//!
//! Training and inference are submitted to a remote service and observed
//! through the [`RemoteJobReconciler`]. The remote job handle is stored in
//! the model record context, so the state query can re-poll it from any
//! process.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use tsplug_core::{ModelState, PluginRequest, TenantId};

use super::{InferenceContext, ModelPlugin, PluginError, ResolvedState, TrainContext};
use crate::model::ModelRecord;
use crate::reconciler::{RemoteCompute, RemoteError, RemoteJobHandle, RemoteJobReconciler, RemoteStatus};
use crate::sink::InferencePoint;

#[derive(Clone)]
pub struct RemoteComputePlugin {
    name: String,
    client: Arc<dyn RemoteCompute>,
    reconciler: RemoteJobReconciler,
}

impl RemoteComputePlugin {
    pub fn new(name: impl Into<String>, client: Arc<dyn RemoteCompute>, reconciler: RemoteJobReconciler) -> Self {
        Self {
            name: name.into(),
            client,
            reconciler,
        }
    }

    fn model_handle(record_context: Option<&serde_json::Value>) -> Result<RemoteJobHandle, PluginError> {
        RemoteJobHandle::from_context(record_context)
            .ok_or_else(|| PluginError::Backend("model has no remote job reference".to_string()))
    }
}

fn failure_message(status: &RemoteStatus, message: Option<String>) -> String {
    message.unwrap_or_else(|| format!("remote job finished with status {}", status))
}

#[async_trait]
impl ModelPlugin for RemoteComputePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn train(&self, ctx: TrainContext) -> Result<(), PluginError> {
        let handle = self.client.submit_training(&ctx.tenant, &ctx.request).await?;
        info!(
            tenant = %ctx.tenant,
            model_id = %ctx.model_id,
            remote_job = %handle.remote_job_id,
            "remote training submitted"
        );
        ctx.progress.checkpoint(Some(handle.to_context())).await?;

        let (client, tenant) = (&self.client, &ctx.tenant);
        let snapshot = self
            .reconciler
            .wait_until_terminal(&handle, Some(&ctx.progress), || {
                client.model_status(tenant, &handle)
            })
            .await?;

        match snapshot.status {
            RemoteStatus::Ready => Ok(()),
            status => Err(PluginError::Backend(failure_message(&status, snapshot.message))),
        }
    }

    async fn inference(&self, ctx: InferenceContext) -> Result<(), PluginError> {
        let model = Self::model_handle(ctx.record_context.as_ref())?;
        let job = self
            .client
            .submit_inference(&ctx.tenant, &model, &ctx.request)
            .await?;

        let (client, tenant) = (&self.client, &ctx.tenant);
        let snapshot = self
            .reconciler
            .wait_until_terminal(&job, None, || client.inference_result(tenant, &job))
            .await?;
        if snapshot.status != RemoteStatus::Ready {
            return Err(PluginError::Backend(failure_message(&snapshot.status, snapshot.message)));
        }

        let points: Vec<InferencePoint> = match snapshot.payload {
            Some(payload) => serde_json::from_value(payload)
                .map_err(|e| PluginError::Backend(format!("malformed inference result: {}", e)))?,
            None => Vec::new(),
        };
        ctx.publisher.publish(&points).await
    }

    async fn delete(&self, tenant: &TenantId, record: &ModelRecord) -> Result<(), PluginError> {
        // Nothing was submitted yet
        let Some(model) = RemoteJobHandle::from_context(record.context.as_ref()) else {
            return Ok(());
        };
        match self.client.delete_model(tenant, &model).await {
            Ok(()) => Ok(()),
            Err(RemoteError::NotFound(id)) => {
                warn!(remote_job = %id, "remote model already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn resolve_state(&self, record: &ModelRecord) -> Result<Option<ResolvedState>, PluginError> {
        let Some(model) = RemoteJobHandle::from_context(record.context.as_ref()) else {
            return Ok(None);
        };
        let snapshot = self.client.model_status(&record.tenant, &model).await?;
        let state = snapshot.status.to_model_state();
        if state == ModelState::Training {
            return Ok(None);
        }
        let message = match state {
            ModelState::Failed => Some(failure_message(&snapshot.status, snapshot.message)),
            _ => snapshot.message,
        };
        Ok(Some(ResolvedState { state, message }))
    }

    fn persists_artifacts(&self) -> bool {
        false
    }
}
