//! Model plugin capability
//!
//! A plugin supplies the algorithm-specific parts of a model's life:
//! request verification, training, inference and cleanup. The orchestrator
//! stays generic over it and owns every metadata write.

pub mod default;
pub mod local;
pub mod remote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tsplug_core::{CoreError, ModelId, ModelState, PluginRequest, TenantId, TimeKey};

use crate::model::ModelRecord;
use crate::progress::{ProgressError, TrainingProgress};
use crate::reconciler::{ReconcileError, RemoteError};
use crate::sink::{InferencePoint, ResultSink, ResultTarget, SinkError};

pub use default::DefaultPlugin;
pub use local::{ComputeBackend, LocalComputePlugin};
pub use remote::RemoteComputePlugin;

#[derive(Error, Debug)]
pub enum PluginError {
    /// The request is not acceptable for this plugin
    #[error("{0}")]
    Verify(String),

    #[error("{0}")]
    Backend(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Request(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Everything a training run gets to work with
pub struct TrainContext {
    pub tenant: TenantId,
    pub model_id: ModelId,
    pub time_key: TimeKey,
    pub request: PluginRequest,
    /// Scratch directory; its contents become the model artifact
    pub workspace: PathBuf,
    pub progress: TrainingProgress,
}

/// Everything an inference run gets to work with
pub struct InferenceContext {
    pub tenant: TenantId,
    pub model_id: ModelId,
    pub time_key: TimeKey,
    pub request: PluginRequest,
    pub workspace: PathBuf,
    /// Materialized artifact, for plugins that persist artifacts
    pub artifact: Option<PathBuf>,
    /// Context stored on the model record at training time
    pub record_context: Option<Value>,
    /// Timestamps to produce, as returned by `inference_time_range`
    pub timestamps: Vec<DateTime<Utc>>,
    pub publisher: ResultPublisher,
}

/// Pushes inference points to the downstream sink
#[derive(Clone)]
pub struct ResultPublisher {
    sink: Arc<dyn ResultSink>,
    target: ResultTarget,
}

impl ResultPublisher {
    pub fn new(sink: Arc<dyn ResultSink>, target: ResultTarget) -> Self {
        Self { sink, target }
    }

    pub fn target(&self) -> &ResultTarget {
        &self.target
    }

    pub async fn publish(&self, points: &[InferencePoint]) -> Result<(), PluginError> {
        if points.is_empty() {
            return Ok(());
        }
        self.sink.save_inference_result(&self.target, points).await?;
        Ok(())
    }
}

/// State observed by a plugin for a model still recorded as Training
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedState {
    pub state: ModelState,
    pub message: Option<String>,
}

#[async_trait]
pub trait ModelPlugin: Send + Sync {
    fn name(&self) -> &str;

    async fn verify(&self, _tenant: &TenantId, _request: &PluginRequest) -> Result<(), PluginError> {
        Ok(())
    }

    async fn train(&self, ctx: TrainContext) -> Result<(), PluginError>;

    async fn inference(&self, ctx: InferenceContext) -> Result<(), PluginError>;

    /// Release backend resources of a model about to be marked Deleted
    async fn delete(&self, _tenant: &TenantId, _record: &ModelRecord) -> Result<(), PluginError> {
        Ok(())
    }

    /// Timestamps an inference request covers.
    ///
    /// Defaults to every step from `startTime` to `endTime` at the request
    /// granularity, or just `endTime` when no granularity is given.
    fn inference_time_range(&self, request: &PluginRequest) -> Result<Vec<DateTime<Utc>>, PluginError> {
        if request.end_time.is_none() {
            return Ok(Vec::new());
        }
        let end = request.end_time()?;
        let start = request.start_time()?;
        match request.granularity() {
            Ok(granularity) => Ok(granularity.steps(start, end)?),
            Err(_) => Ok(vec![end]),
        }
    }

    /// Re-derive the state of a Training model from the backend.
    ///
    /// `None` keeps the stored state.
    async fn resolve_state(&self, _record: &ModelRecord) -> Result<Option<ResolvedState>, PluginError> {
        Ok(None)
    }

    /// Whether the training workspace is kept as a durable artifact
    fn persists_artifacts(&self) -> bool {
        true
    }
}
