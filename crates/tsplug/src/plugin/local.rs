//! In-process compute
//!
//! The numeric algorithm is an injected, blocking [`ComputeBackend`]; this
//! plugin moves it off the async runtime and drives it per time step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tsplug_core::{Granularity, PluginRequest, TenantId};

use super::{InferenceContext, ModelPlugin, PluginError, TrainContext};
use crate::config::ServiceConfig;
use crate::sink::InferencePoint;

/// Blocking model algorithm
pub trait ComputeBackend: Send + Sync + 'static {
    /// Extra request checks beyond the plugin's own
    fn verify(&self, _request: &PluginRequest) -> anyhow::Result<()> {
        Ok(())
    }

    /// Train and write the model files into `workspace`
    fn train(&self, request: &PluginRequest, workspace: &Path) -> anyhow::Result<()>;

    /// Produce the points for one timestamp from a trained model at `artifact`
    fn infer(
        &self,
        request: &PluginRequest,
        artifact: &Path,
        timestamp: DateTime<Utc>,
    ) -> anyhow::Result<Vec<InferencePoint>>;
}

#[derive(Clone)]
pub struct LocalComputePlugin {
    name: String,
    backend: Arc<dyn ComputeBackend>,
    series_limit: usize,
}

impl LocalComputePlugin {
    pub fn new(name: impl Into<String>, backend: Arc<dyn ComputeBackend>, series_limit: usize) -> Self {
        Self {
            name: name.into(),
            backend,
            series_limit,
        }
    }

    /// Series limit taken from the service configuration
    pub fn from_config(name: impl Into<String>, backend: Arc<dyn ComputeBackend>, config: &ServiceConfig) -> Self {
        Self::new(name, backend, config.series_limit)
    }

    pub fn series_limit(&self) -> usize {
        self.series_limit
    }
}

/// Every series set that declares a granularity must declare the same one
fn check_granularity(request: &PluginRequest) -> Result<Option<Granularity>, PluginError> {
    let mut seen: Option<Granularity> = None;
    for meta in request.series_sets.iter().filter_map(|s| s.metric_meta.as_ref()) {
        let Some(name) = meta.granularity_name.as_deref() else {
            continue;
        };
        let granularity = Granularity::from_name(name, meta.granularity_amount.unwrap_or(0))
            .map_err(|e| PluginError::Verify(e.to_string()))?;
        match seen {
            Some(previous) if previous != granularity => {
                return Err(PluginError::Verify(
                    "Series sets must have the same granularity".to_string(),
                ));
            }
            _ => seen = Some(granularity),
        }
    }
    Ok(seen)
}

#[async_trait]
impl ModelPlugin for LocalComputePlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn verify(&self, _tenant: &TenantId, request: &PluginRequest) -> Result<(), PluginError> {
        if request.series_sets.is_empty() {
            return Err(PluginError::Verify("No series sets in request".to_string()));
        }
        if request.series_sets.len() > self.series_limit {
            return Err(PluginError::Verify(format!(
                "Series sets exceed the limit of {}",
                self.series_limit
            )));
        }
        check_granularity(request)?;
        self.backend
            .verify(request)
            .map_err(|e| PluginError::Verify(e.to_string()))
    }

    async fn train(&self, ctx: TrainContext) -> Result<(), PluginError> {
        let backend = self.backend.clone();
        let request = ctx.request;
        let workspace = ctx.workspace;

        info!(tenant = %ctx.tenant, model_id = %ctx.model_id, plugin = %self.name, "local training started");
        tokio::task::spawn_blocking(move || backend.train(&request, &workspace))
            .await
            .map_err(|e| PluginError::Backend(format!("training task aborted: {}", e)))?
            .map_err(|e| PluginError::Backend(e.to_string()))
    }

    async fn inference(&self, ctx: InferenceContext) -> Result<(), PluginError> {
        let artifact = ctx
            .artifact
            .clone()
            .ok_or_else(|| PluginError::Backend("model artifact is not available".to_string()))?;
        let request = Arc::new(ctx.request);

        for timestamp in ctx.timestamps {
            let backend = self.backend.clone();
            let request = request.clone();
            let artifact = artifact.clone();
            let step = tokio::task::spawn_blocking(move || backend.infer(&request, &artifact, timestamp))
                .await
                .map_err(|e| anyhow::anyhow!("inference task aborted: {}", e))
                .and_then(|result| result);

            match step {
                Ok(points) => ctx.publisher.publish(&points).await?,
                Err(e) => {
                    warn!(
                        tenant = %ctx.tenant,
                        model_id = %ctx.model_id,
                        timestamp = %timestamp,
                        error = %e,
                        "inference step failed, skipping"
                    );
                }
            }
        }
        Ok(())
    }
}
