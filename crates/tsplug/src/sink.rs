//! Downstream delivery of training and inference results
//!
//! Delivery is best-effort: the engine logs sink failures and moves on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::info;
use tsplug_core::{ModelId, ModelState, TenantId};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    #[error("Rejected by sink: {0}")]
    Rejected(String),
}

/// Status of one inference point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum PointStatus {
    Running,
    Ready,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferencePoint {
    pub timestamp: DateTime<Utc>,
    pub status: PointStatus,
    #[serde(default)]
    pub value: Value,
}

impl InferencePoint {
    /// Placeholder published before computation starts
    pub fn running(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            status: PointStatus::Running,
            value: Value::Null,
        }
    }

    pub fn ready(timestamp: DateTime<Utc>, value: Value) -> Self {
        Self {
            timestamp,
            status: PointStatus::Ready,
            value,
        }
    }
}

/// Which model a batch of results belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultTarget {
    pub tenant: TenantId,
    pub model_id: ModelId,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub target: ResultTarget,
    pub state: ModelState,
    pub message: String,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save_training_result(&self, report: &TrainingReport) -> Result<(), SinkError>;

    async fn save_inference_result(
        &self,
        target: &ResultTarget,
        points: &[InferencePoint],
    ) -> Result<(), SinkError>;

    async fn save_inference_error(
        &self,
        target: &ResultTarget,
        message: &str,
    ) -> Result<(), SinkError>;
}

/// Writes results to the log only
#[derive(Debug, Clone, Default)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn save_training_result(&self, report: &TrainingReport) -> Result<(), SinkError> {
        info!(
            tenant = %report.target.tenant,
            model_id = %report.target.model_id,
            state = %report.state,
            message = %report.message,
            "training result"
        );
        Ok(())
    }

    async fn save_inference_result(
        &self,
        target: &ResultTarget,
        points: &[InferencePoint],
    ) -> Result<(), SinkError> {
        info!(
            tenant = %target.tenant,
            model_id = %target.model_id,
            points = points.len(),
            "inference result"
        );
        Ok(())
    }

    async fn save_inference_error(
        &self,
        target: &ResultTarget,
        message: &str,
    ) -> Result<(), SinkError> {
        info!(
            tenant = %target.tenant,
            model_id = %target.model_id,
            message,
            "inference failed"
        );
        Ok(())
    }
}

/// Keeps everything it receives; used in tests and local runs
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    trainings: Arc<Mutex<Vec<TrainingReport>>>,
    points: Arc<Mutex<Vec<(ResultTarget, InferencePoint)>>>,
    errors: Arc<Mutex<Vec<(ResultTarget, String)>>>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trainings(&self) -> Vec<TrainingReport> {
        self.trainings.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Every point received for a model, in arrival order
    pub fn points(&self, model_id: &ModelId) -> Vec<InferencePoint> {
        self.points
            .lock()
            .map(|v| {
                v.iter()
                    .filter(|(target, _)| &target.model_id == model_id)
                    .map(|(_, point)| point.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Latest point per timestamp for a model
    pub fn latest_points(&self, model_id: &ModelId) -> Vec<InferencePoint> {
        let mut latest: Vec<InferencePoint> = Vec::new();
        for point in self.points(model_id) {
            match latest.iter_mut().find(|p| p.timestamp == point.timestamp) {
                Some(existing) => *existing = point,
                None => latest.push(point),
            }
        }
        latest.sort_by_key(|p| p.timestamp);
        latest
    }

    pub fn errors(&self, model_id: &ModelId) -> Vec<String> {
        self.errors
            .lock()
            .map(|v| {
                v.iter()
                    .filter(|(target, _)| &target.model_id == model_id)
                    .map(|(_, message)| message.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> SinkError {
    SinkError::Unavailable("in-memory sink lock poisoned".to_string())
}

#[async_trait]
impl ResultSink for InMemorySink {
    async fn save_training_result(&self, report: &TrainingReport) -> Result<(), SinkError> {
        self.trainings.lock().map_err(poisoned)?.push(report.clone());
        Ok(())
    }

    async fn save_inference_result(
        &self,
        target: &ResultTarget,
        points: &[InferencePoint],
    ) -> Result<(), SinkError> {
        let mut stored = self.points.lock().map_err(poisoned)?;
        stored.extend(points.iter().map(|p| (target.clone(), p.clone())));
        Ok(())
    }

    async fn save_inference_error(
        &self,
        target: &ResultTarget,
        message: &str,
    ) -> Result<(), SinkError> {
        self.errors
            .lock()
            .map_err(poisoned)?
            .push((target.clone(), message.to_string()));
        Ok(())
    }
}
