//! Plugin service: train, inference, state, delete and list use cases
//!
//! The service is the only writer of model records. Validation and
//! admission happen synchronously on the request path; the actual work is
//! handed to the [`JobDispatcher`] and its outcome comes back through a
//! completion callback.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tsplug_core::{Fingerprint, ModelId, ModelState, PluginRequest, TenantId};

use crate::admission::{AdmissionController, OwnerKey};
use crate::config::ServiceConfig;
use crate::dispatcher::{Job, JobDispatcher, JobHandle, JobKind, JobOutcome};
use crate::error::{Result, ServiceError};
use crate::model::{ModelError, ModelRecord, ModelRepository, ModelSummary};
use crate::plugin::{InferenceContext, ModelPlugin, PluginError, ResultPublisher, TrainContext};
use crate::progress::TrainingProgress;
use crate::reconciler::RemoteError;
use crate::sink::{InferencePoint, ResultSink, ResultTarget, TrainingReport};
use crate::storage::{ArtifactCache, ArtifactKey, LocalArtifactStore};

pub const VERIFY_FAILED: &str = "Verify failed! ";
pub const VERIFY_SUCCEEDED: &str = "Verify successfully! ";
pub const TRAINING_LIMIT_REACHED: &str = "Models in training limit reached! Abort training this time.";
pub const TRAINING_TASK_CREATED: &str = "Training task created";
pub const TRAINING_COMPLETED: &str = "Training completed";
pub const INFERENCE_TASK_CREATED: &str = "Inference task created";
pub const MODEL_NOT_FOUND: &str = "Model is not found!";
pub const INCONSISTENT_REQUEST: &str = "Inconsistent series sets or params!";
pub const MODEL_STORAGE_FAILED: &str = "Model storage failed!";
pub const TRAINING_EXPIRED: &str = "Training expired";

/// Acknowledgement of an accepted train or inference request
#[derive(Debug)]
pub struct TaskCreated {
    pub model_id: ModelId,
    pub instance_id: String,
    pub state: ModelState,
    pub message: String,
    /// Settles when the background job is done
    pub job: JobHandle,
}

#[derive(Clone)]
pub struct PluginService {
    plugin: Arc<dyn ModelPlugin>,
    repository: Arc<dyn ModelRepository>,
    admission: AdmissionController,
    dispatcher: Arc<JobDispatcher>,
    artifacts: ArtifactCache,
    sink: Arc<dyn ResultSink>,
    config: ServiceConfig,
}

impl PluginService {
    pub fn new(
        plugin: Arc<dyn ModelPlugin>,
        repository: Arc<dyn ModelRepository>,
        dispatcher: Arc<JobDispatcher>,
        artifacts: ArtifactCache,
        sink: Arc<dyn ResultSink>,
        config: ServiceConfig,
    ) -> Self {
        let admission = AdmissionController::new(
            repository.clone(),
            config.models_in_training_limit_per_instance,
        );
        Self {
            plugin,
            repository,
            admission,
            dispatcher,
            artifacts,
            sink,
            config,
        }
    }

    /// Build the dispatcher and local artifact storage from `config`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn from_config(
        plugin: Arc<dyn ModelPlugin>,
        repository: Arc<dyn ModelRepository>,
        sink: Arc<dyn ResultSink>,
        config: ServiceConfig,
    ) -> Self {
        let dispatcher = Arc::new(JobDispatcher::from_config(&config));
        let store = Arc::new(LocalArtifactStore::from_config(&config));
        let artifacts = ArtifactCache::new(store, &config.model_cache_dir);
        Self::new(plugin, repository, dispatcher, artifacts, sink, config)
    }

    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    pub fn dispatcher(&self) -> &Arc<JobDispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Run the plugin's request checks
    pub async fn verify(&self, tenant: &TenantId, request: &PluginRequest) -> Result<()> {
        self.plugin
            .verify(tenant, request)
            .await
            .map_err(|e| ServiceError::Validation(format!("{}{}", VERIFY_FAILED, e)))
    }

    /// Accept a training request and start training in the background
    pub async fn train(&self, tenant: &TenantId, request: PluginRequest) -> Result<TaskCreated> {
        self.verify(tenant, &request).await?;

        let owner = OwnerKey::new(tenant.clone(), request.instance_id());
        let permit = self
            .admission
            .try_admit(&owner)
            .await?
            .ok_or_else(|| ServiceError::AdmissionRejected(TRAINING_LIMIT_REACHED.to_string()))?;

        let record = ModelRecord::new_training(
            tenant.clone(),
            request.instance_id(),
            Fingerprint::of(&request),
        );
        let record = self.repository.insert(record).await?;
        info!(tenant = %tenant, model_id = %record.id, instance_id = %record.instance_id, "training accepted");

        let key = ArtifactKey::new(tenant.clone(), record.id.clone(), record.time_key.clone());
        let target = Self::target_of(&record);
        let job = Job::new(
            tenant.clone(),
            record.id.clone(),
            record.time_key.clone(),
            JobKind::Train,
        );

        let work = {
            let plugin = self.plugin.clone();
            let store = self.artifacts.store().clone();
            let progress = TrainingProgress::new(self.repository.clone(), tenant.clone(), record.id.clone());
            move |workspace: PathBuf| async move {
                let ctx = TrainContext {
                    tenant: key.tenant.clone(),
                    model_id: key.model_id.clone(),
                    time_key: key.time_key.clone(),
                    request,
                    workspace: workspace.clone(),
                    progress,
                };
                if let Err(e) = plugin.train(ctx).await {
                    return JobOutcome::failure(e.to_string());
                }
                if plugin.persists_artifacts() {
                    if let Err(e) = store.persist(&key, &workspace).await {
                        error!(artifact = %key, error = %e, "failed to persist model artifact");
                        return JobOutcome::failure(MODEL_STORAGE_FAILED);
                    }
                }
                JobOutcome::Success
            }
        };

        let callback = {
            let service = self.clone();
            move |outcome: JobOutcome| async move {
                // Hold the slot until the record reached its terminal state
                let _permit = permit;
                service.complete_training(target, outcome).await;
            }
        };

        let handle = match self.dispatcher.submit(job, work, callback) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(tenant = %tenant, model_id = %record.id, error = %e, "training could not be scheduled");
                self.mark_failed(tenant, &record.id, e.to_string()).await;
                return Err(e.into());
            }
        };

        Ok(TaskCreated {
            model_id: record.id,
            instance_id: record.instance_id,
            state: record.state,
            message: TRAINING_TASK_CREATED.to_string(),
            job: handle,
        })
    }

    async fn complete_training(&self, target: ResultTarget, outcome: JobOutcome) {
        let (state, message) = match outcome {
            JobOutcome::Success => (ModelState::Ready, TRAINING_COMPLETED.to_string()),
            JobOutcome::Failure(message) => (ModelState::Failed, message),
        };
        let last_error = (state == ModelState::Failed).then(|| message.clone());

        let mutation = Box::new(move |record: &mut ModelRecord| {
            if record.state != ModelState::Training {
                return Err(ModelError::Rejected(format!("model is already {}", record.state)));
            }
            record.transition(state)?;
            record.last_error = last_error;
            Ok(())
        });

        match self
            .repository
            .update(&target.tenant, &target.model_id, mutation)
            .await
        {
            Ok(_) => {
                info!(tenant = %target.tenant, model_id = %target.model_id, state = %state, "training settled");
            }
            Err(ModelError::NotFound(_)) | Err(ModelError::Rejected(_)) => {
                // Never resurrect a record that moved on without us
                self.discard_training_result(&target).await;
                return;
            }
            Err(e) => {
                error!(tenant = %target.tenant, model_id = %target.model_id, error = %e, "failed to record training result");
                return;
            }
        }

        self.report_training(target, state, message).await;
    }

    /// The record left Training before the job settled.
    ///
    /// A state query that settled it already reported the result. A delete
    /// may have run before the artifact was persisted, so the artifact is
    /// removed again.
    async fn discard_training_result(&self, target: &ResultTarget) {
        match self.repository.get(&target.tenant, &target.model_id).await {
            Ok(Some(current)) if !current.is_deleted() => {
                info!(model_id = %target.model_id, state = %current.state, "training already settled, result discarded");
            }
            Ok(_) => {
                info!(model_id = %target.model_id, "model deleted during training, result discarded");
                self.remove_artifacts(&target.tenant, &target.model_id).await;
            }
            Err(e) => {
                warn!(model_id = %target.model_id, error = %e, "could not re-read discarded model");
            }
        }
    }

    /// Downstream delivery of a record's move out of Training.
    ///
    /// Called by whichever path won that transition.
    async fn report_training(&self, target: ResultTarget, state: ModelState, message: String) {
        let report = TrainingReport {
            target,
            state,
            message,
        };
        if let Err(e) = self.sink.save_training_result(&report).await {
            warn!(model_id = %report.target.model_id, error = %e, "failed to deliver training result");
        }
    }

    async fn remove_artifacts(&self, tenant: &TenantId, model_id: &ModelId) {
        if let Err(e) = self.artifacts.store().remove_model(tenant, model_id).await {
            warn!(model_id = %model_id, error = %e, "failed to remove model artifacts");
        }
        if let Err(e) = self.artifacts.evict_model(tenant, model_id).await {
            warn!(model_id = %model_id, error = %e, "failed to evict cached artifacts");
        }
    }

    /// Best effort: move a Training record to Failed
    async fn mark_failed(&self, tenant: &TenantId, model_id: &ModelId, message: String) {
        let mutation = Box::new(move |record: &mut ModelRecord| {
            if record.state != ModelState::Training {
                return Err(ModelError::Rejected(format!("model is {}", record.state)));
            }
            record.transition(ModelState::Failed)?;
            record.last_error = Some(message);
            Ok(())
        });
        if let Err(e) = self.repository.update(tenant, model_id, mutation).await {
            debug!(model_id = %model_id, error = %e, "could not mark model failed");
        }
    }

    /// A record that exists and is not Deleted
    async fn live_record(&self, tenant: &TenantId, model_id: &ModelId) -> Result<ModelRecord> {
        match self.repository.get(tenant, model_id).await? {
            Some(record) if !record.is_deleted() => Ok(record),
            _ => Err(ServiceError::NotFound(MODEL_NOT_FOUND.to_string())),
        }
    }

    /// Accept an inference request against a Ready model
    pub async fn inference(
        &self,
        tenant: &TenantId,
        model_id: &ModelId,
        request: PluginRequest,
    ) -> Result<TaskCreated> {
        self.verify(tenant, &request).await?;

        let record = self.live_record(tenant, model_id).await?;
        if record.state != ModelState::Ready {
            return Err(ServiceError::NotReady(record.state));
        }
        if Fingerprint::of(&request) != record.fingerprint {
            return Err(ServiceError::Validation(INCONSISTENT_REQUEST.to_string()));
        }
        let timestamps = self
            .plugin
            .inference_time_range(&request)
            .map_err(|e| ServiceError::Validation(e.to_string()))?;

        let key = ArtifactKey::new(tenant.clone(), record.id.clone(), record.time_key.clone());
        let target = Self::target_of(&record);
        let job = Job::new(
            tenant.clone(),
            record.id.clone(),
            record.time_key.clone(),
            JobKind::Infer,
        );

        let work = {
            let plugin = self.plugin.clone();
            let cache = self.artifacts.clone();
            let publisher = ResultPublisher::new(self.sink.clone(), target.clone());
            let key = key.clone();
            let record_context = record.context.clone();
            move |workspace: PathBuf| async move {
                let placeholders: Vec<InferencePoint> =
                    timestamps.iter().copied().map(InferencePoint::running).collect();
                if let Err(e) = publisher.publish(&placeholders).await {
                    warn!(model_id = %key.model_id, error = %e, "failed to publish placeholders");
                }

                let artifact = if plugin.persists_artifacts() {
                    match cache.prepare(&key, false).await {
                        Ok(path) => Some(path),
                        Err(e) => return JobOutcome::failure(format!("Model artifact unavailable: {}", e)),
                    }
                } else {
                    None
                };

                let ctx = InferenceContext {
                    tenant: key.tenant.clone(),
                    model_id: key.model_id.clone(),
                    time_key: key.time_key.clone(),
                    request,
                    workspace,
                    artifact,
                    record_context,
                    timestamps,
                    publisher,
                };
                match plugin.inference(ctx).await {
                    Ok(()) => JobOutcome::Success,
                    Err(e) => JobOutcome::failure(e.to_string()),
                }
            }
        };

        let callback = {
            let service = self.clone();
            move |outcome: JobOutcome| async move {
                if let JobOutcome::Failure(message) = outcome {
                    service.recover_inference(&key, &target, &message).await;
                }
            }
        };

        let handle = self.dispatcher.submit(job, work, callback)?;
        info!(tenant = %tenant, model_id = %record.id, "inference accepted");

        Ok(TaskCreated {
            model_id: record.id,
            instance_id: record.instance_id,
            state: record.state,
            message: INFERENCE_TASK_CREATED.to_string(),
            job: handle,
        })
    }

    /// Refresh the local artifact copy and report the failure downstream.
    /// The model's lifecycle state is left alone.
    async fn recover_inference(&self, key: &ArtifactKey, target: &ResultTarget, message: &str) {
        error!(model_id = %target.model_id, error = %message, "inference failed");
        if self.plugin.persists_artifacts() {
            if let Err(e) = self.artifacts.prepare(key, true).await {
                warn!(artifact = %key, error = %e, "failed to refresh model artifact");
            }
        }
        if let Err(e) = self.sink.save_inference_error(target, message).await {
            warn!(model_id = %target.model_id, error = %e, "failed to deliver inference error");
        }
    }

    /// Current record of a model.
    ///
    /// Training records are re-resolved through the plugin and expired when
    /// they have not been touched for `training_expiry_secs`.
    pub async fn state(&self, tenant: &TenantId, model_id: &ModelId) -> Result<ModelRecord> {
        let record = self
            .repository
            .get(tenant, model_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(MODEL_NOT_FOUND.to_string()))?;
        if record.state != ModelState::Training {
            return Ok(record);
        }

        let record = self.resolve_training(record).await;
        if record.state != ModelState::Training {
            return Ok(record);
        }
        Ok(self.expire_if_stale(record).await)
    }

    async fn resolve_training(&self, record: ModelRecord) -> ModelRecord {
        let resolved = match self.plugin.resolve_state(&record).await {
            Ok(Some(resolved)) => resolved,
            Ok(None) => return record,
            Err(e) => {
                warn!(model_id = %record.id, error = %e, "could not resolve model state");
                return record;
            }
        };

        let state = resolved.state;
        let message = resolved.message.clone();
        let mutation = Box::new(move |current: &mut ModelRecord| {
            if current.state != ModelState::Training {
                return Err(ModelError::Rejected(format!("model is {}", current.state)));
            }
            current.transition(resolved.state)?;
            if resolved.state == ModelState::Failed {
                current.last_error = resolved.message;
            }
            Ok(())
        });
        match self.repository.update(&record.tenant, &record.id, mutation).await {
            Ok(updated) => {
                info!(model_id = %updated.id, state = %updated.state, "model state resolved");
                if state != ModelState::Training {
                    let message = message.unwrap_or_else(|| match state {
                        ModelState::Ready => TRAINING_COMPLETED.to_string(),
                        _ => String::new(),
                    });
                    self.report_training(Self::target_of(&updated), state, message).await;
                }
                updated
            }
            Err(e) => {
                debug!(model_id = %record.id, error = %e, "resolved state not applied");
                self.reread(record).await
            }
        }
    }

    async fn expire_if_stale(&self, record: ModelRecord) -> ModelRecord {
        let expiry = self.config.training_expiry();
        let stale = move |r: &ModelRecord| {
            !expiry.is_zero()
                && (chrono::Utc::now() - r.updated_at)
                    .to_std()
                    .is_ok_and(|age| age > expiry)
        };
        if !stale(&record) {
            return record;
        }

        let mutation = Box::new(move |current: &mut ModelRecord| {
            if current.state != ModelState::Training || !stale(current) {
                return Err(ModelError::Rejected("model is no longer stale".to_string()));
            }
            current.transition(ModelState::Failed)?;
            current.last_error = Some(TRAINING_EXPIRED.to_string());
            Ok(())
        });
        match self.repository.update(&record.tenant, &record.id, mutation).await {
            Ok(updated) => {
                warn!(model_id = %updated.id, "stale training expired");
                self.report_training(
                    Self::target_of(&updated),
                    ModelState::Failed,
                    TRAINING_EXPIRED.to_string(),
                )
                .await;
                updated
            }
            Err(e) => {
                debug!(model_id = %record.id, error = %e, "expiry not applied");
                self.reread(record).await
            }
        }
    }

    fn target_of(record: &ModelRecord) -> ResultTarget {
        ResultTarget {
            tenant: record.tenant.clone(),
            model_id: record.id.clone(),
            instance_id: record.instance_id.clone(),
        }
    }

    async fn reread(&self, record: ModelRecord) -> ModelRecord {
        match self.repository.get(&record.tenant, &record.id).await {
            Ok(Some(current)) => current,
            _ => record,
        }
    }

    /// Release backend resources and mark the model Deleted.
    ///
    /// When the plugin fails to delete, the record is left unchanged.
    pub async fn delete(&self, tenant: &TenantId, model_id: &ModelId) -> Result<ModelRecord> {
        let record = self.live_record(tenant, model_id).await?;

        self.plugin
            .delete(tenant, &record)
            .await
            .map_err(|e| match e {
                PluginError::Remote(RemoteError::Transient(message)) => {
                    ServiceError::TransientRemote(message)
                }
                other => ServiceError::Backend(other.to_string()),
            })?;

        let updated = self
            .repository
            .update(
                tenant,
                model_id,
                Box::new(|r: &mut ModelRecord| r.transition(ModelState::Deleted)),
            )
            .await
            .map_err(|e| match e {
                ModelError::NotFound(_) | ModelError::Transition(_) => {
                    ServiceError::NotFound(MODEL_NOT_FOUND.to_string())
                }
                other => other.into(),
            })?;

        self.remove_artifacts(tenant, model_id).await;

        info!(tenant = %tenant, model_id = %model_id, "model deleted");
        Ok(updated)
    }

    /// Summaries of a tenant's models, newest first
    pub async fn list(&self, tenant: &TenantId) -> Result<Vec<ModelSummary>> {
        Ok(self
            .repository
            .list(tenant)
            .await?
            .iter()
            .map(ModelRecord::summary)
            .collect())
    }

    /// Stop accepting jobs and wait for queued ones
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}
