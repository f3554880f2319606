use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Root for per-job temporary workspaces
    pub model_temp_dir: String,

    /// Durable artifact root
    pub model_dir: String,

    /// Materialized artifacts used by inference
    pub model_cache_dir: String,

    /// Maximum models in Training per (tenant, instance)
    pub models_in_training_limit_per_instance: usize,

    /// Maximum series sets accepted in one request
    pub series_limit: usize,

    /// Number of dispatcher workers
    pub worker_count: usize,

    /// Pending jobs the dispatcher queue can hold
    pub queue_capacity: usize,

    /// Remote job polling
    pub poll: PollConfig,

    /// Training records untouched for this long are expired on read
    pub training_expiry_secs: u64,

    /// Health monitor tick
    pub monitor_interval_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            model_temp_dir: "model_temp".to_string(),
            model_dir: "models".to_string(),
            model_cache_dir: "model_cache".to_string(),
            models_in_training_limit_per_instance: 10,
            series_limit: 1000,
            worker_count: 16,
            queue_capacity: 256,
            poll: PollConfig::default(),
            training_expiry_secs: 86_400,
            monitor_interval_secs: 10,
        }
    }
}

impl ServiceConfig {
    /// Load from a `.toml` or JSON configuration file
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        let is_toml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        if is_toml {
            toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))
        } else {
            serde_json::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))
        }
    }

    pub fn training_expiry(&self) -> Duration {
        Duration::from_secs(self.training_expiry_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }
}

/// Remote job polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Initial delay between status polls
    pub interval_secs: u64,

    /// Multiplier applied to the delay after each non-terminal poll
    pub backoff_factor: f64,

    /// Upper bound for the delay
    pub max_interval_secs: u64,

    /// Give up and fail the model after this long; `None` waits forever
    pub timeout_secs: Option<u64>,

    /// Consecutive transient errors tolerated before failing
    pub max_transient_errors: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            backoff_factor: 1.0,
            max_interval_secs: 60,
            timeout_secs: Some(21_600),
            max_transient_errors: 5,
        }
    }
}
