//! Polling of jobs that run in a remote, already-async compute service

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};
use tsplug_core::{ModelState, PluginRequest, TenantId};

use crate::config::{PollConfig, ServiceConfig};
use crate::progress::{ProgressError, TrainingProgress};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Worth polling again
    #[error("Transient remote error: {0}")]
    Transient(String),

    #[error("Remote job not found: {0}")]
    NotFound(String),

    #[error("Remote service rejected the request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Remote job {job} did not finish within {elapsed:?}")]
    Timeout { job: String, elapsed: Duration },

    #[error("Remote job {job} failed {count} polls in a row, last error: {last}")]
    TooManyTransientErrors { job: String, count: u32, last: String },

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Status vocabulary of the remote service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteStatus {
    Created,
    Running,
    Ready,
    Failed,
    Deleted,
    Other(String),
}

impl RemoteStatus {
    /// Parse a status string as reported on the wire, case-insensitively
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "CREATED" => Self::Created,
            "RUNNING" => Self::Running,
            "READY" => Self::Ready,
            "FAILED" => Self::Failed,
            "DELETED" => Self::Deleted,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Created | Self::Running)
    }

    /// Local lifecycle state for this remote status; unknown statuses fail
    pub fn to_model_state(&self) -> ModelState {
        match self {
            Self::Created | Self::Running => ModelState::Training,
            Self::Ready => ModelState::Ready,
            Self::Deleted => ModelState::Deleted,
            Self::Failed | Self::Other(_) => ModelState::Failed,
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Ready => write!(f, "READY"),
            Self::Failed => write!(f, "FAILED"),
            Self::Deleted => write!(f, "DELETED"),
            Self::Other(raw) => write!(f, "{}", raw),
        }
    }
}

/// Reference to a remote job, stored in `ModelRecord.context` so any
/// process can resume observing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteJobHandle {
    pub remote_job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
}

impl RemoteJobHandle {
    pub fn new(remote_job_id: impl Into<String>) -> Self {
        Self {
            remote_job_id: remote_job_id.into(),
            poll_interval_secs: None,
        }
    }

    pub fn to_context(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Recover a handle from a record context, if it carries one
    pub fn from_context(context: Option<&Value>) -> Option<Self> {
        context.and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

/// One observation of a remote job
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    pub status: RemoteStatus,
    pub message: Option<String>,
    pub payload: Option<Value>,
}

impl RemoteSnapshot {
    pub fn new(status: RemoteStatus) -> Self {
        Self {
            status,
            message: None,
            payload: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Client of the remote compute service; the wire protocol lives behind it
#[async_trait]
pub trait RemoteCompute: Send + Sync {
    async fn submit_training(
        &self,
        tenant: &TenantId,
        request: &PluginRequest,
    ) -> Result<RemoteJobHandle, RemoteError>;

    async fn model_status(
        &self,
        tenant: &TenantId,
        job: &RemoteJobHandle,
    ) -> Result<RemoteSnapshot, RemoteError>;

    /// Returns the handle of the inference job
    async fn submit_inference(
        &self,
        tenant: &TenantId,
        model: &RemoteJobHandle,
        request: &PluginRequest,
    ) -> Result<RemoteJobHandle, RemoteError>;

    /// Inference status; a Ready snapshot carries the result points as payload
    async fn inference_result(
        &self,
        tenant: &TenantId,
        job: &RemoteJobHandle,
    ) -> Result<RemoteSnapshot, RemoteError>;

    async fn delete_model(&self, tenant: &TenantId, model: &RemoteJobHandle) -> Result<(), RemoteError>;
}

/// Poll timing
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub backoff_factor: f64,
    pub max_interval: Duration,
    pub timeout: Option<Duration>,
    pub max_transient_errors: u32,
}

impl PollPolicy {
    /// Fixed interval, no timeout
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            backoff_factor: 1.0,
            max_interval: interval,
            timeout: None,
            max_transient_errors: u32::MAX,
        }
    }

    fn next_delay(&self, current: Duration) -> Duration {
        if self.backoff_factor <= 1.0 {
            return current;
        }
        let next = current.as_secs_f64() * self.backoff_factor;
        Duration::from_secs_f64(next.min(self.max_interval.as_secs_f64()))
    }
}

impl From<&PollConfig> for PollPolicy {
    fn from(config: &PollConfig) -> Self {
        let interval = Duration::from_secs(config.interval_secs);
        Self {
            interval,
            backoff_factor: config.backoff_factor,
            max_interval: Duration::from_secs(config.max_interval_secs).max(interval),
            timeout: config.timeout_secs.map(Duration::from_secs),
            max_transient_errors: config.max_transient_errors,
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from(&PollConfig::default())
    }
}

/// Waits for remote jobs to reach a terminal status
#[derive(Debug, Clone, Default)]
pub struct RemoteJobReconciler {
    policy: PollPolicy,
}

impl RemoteJobReconciler {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    /// Policy taken from the `poll` section of the service configuration
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(PollPolicy::from(&config.poll))
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Poll `probe` until it reports a terminal status.
    ///
    /// Each non-terminal observation is checkpointed through `progress`, so
    /// a concurrent state query sees the model as Training and a deleted
    /// model stops the loop.
    pub async fn wait_until_terminal<F, Fut>(
        &self,
        job: &RemoteJobHandle,
        progress: Option<&TrainingProgress>,
        mut probe: F,
    ) -> Result<RemoteSnapshot, ReconcileError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<RemoteSnapshot, RemoteError>>,
    {
        let started = Instant::now();
        let mut delay = job
            .poll_interval_secs
            .map(Duration::from_secs)
            .unwrap_or(self.policy.interval);
        let mut transient_errors = 0u32;

        loop {
            match probe().await {
                Ok(snapshot) if snapshot.status.is_terminal() => {
                    debug!(remote_job = %job.remote_job_id, status = %snapshot.status, "remote job settled");
                    return Ok(snapshot);
                }
                Ok(snapshot) => {
                    transient_errors = 0;
                    debug!(remote_job = %job.remote_job_id, status = %snapshot.status, "remote job pending");
                    if let Some(progress) = progress {
                        progress.checkpoint(None).await?;
                    }
                }
                Err(RemoteError::Transient(message)) => {
                    transient_errors += 1;
                    warn!(
                        remote_job = %job.remote_job_id,
                        attempt = transient_errors,
                        error = %message,
                        "remote status poll failed"
                    );
                    if transient_errors >= self.policy.max_transient_errors {
                        return Err(ReconcileError::TooManyTransientErrors {
                            job: job.remote_job_id.clone(),
                            count: transient_errors,
                            last: message,
                        });
                    }
                }
                Err(e) => return Err(e.into()),
            }

            let elapsed = started.elapsed();
            if let Some(timeout) = self.policy.timeout {
                if elapsed >= timeout {
                    return Err(ReconcileError::Timeout {
                        job: job.remote_job_id.clone(),
                        elapsed,
                    });
                }
            }

            tokio::time::sleep(delay).await;
            delay = self.policy.next_delay(delay);
        }
    }
}
