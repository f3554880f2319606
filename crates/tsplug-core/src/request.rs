//! Plugin request envelope
//!
//! Train, inference and verify requests share one JSON shape. Only the
//! fields the host itself reads are typed; everything else is carried
//! through untouched for the plugin.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{CoreError, GranSpec, Granularity, Result};

/// Request body accepted by every plugin endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRequest {
    pub instance: InstanceSpec,
    #[serde(default)]
    pub series_sets: Vec<SeriesSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gran: Option<GranSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The calling application instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One requested series set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series_set_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_meta: Option<MetricMeta>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granularity_amount: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginRequest {
    /// Build a minimal request for an instance
    pub fn for_instance(instance_id: impl Into<String>, params: Value) -> Self {
        Self {
            instance: InstanceSpec {
                instance_id: instance_id.into(),
                instance_name: None,
                params,
                extra: Map::new(),
            },
            series_sets: Vec::new(),
            gran: None,
            start_time: None,
            end_time: None,
            extra: Map::new(),
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance.instance_id
    }

    pub fn params(&self) -> &Value {
        &self.instance.params
    }

    /// Look up one instance parameter
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.instance.params.get(key)
    }

    /// Parsed `endTime`; required by every time-ranged operation
    pub fn end_time(&self) -> Result<DateTime<Utc>> {
        let raw = self
            .end_time
            .as_deref()
            .ok_or_else(|| CoreError::InvalidRequest("endTime is required".to_string()))?;
        parse_time(raw)
    }

    /// Parsed `startTime`, falling back to `endTime` when absent
    pub fn start_time(&self) -> Result<DateTime<Utc>> {
        match self.start_time.as_deref() {
            Some(raw) => parse_time(raw),
            None => self.end_time(),
        }
    }

    /// Granularity from `gran`, or from the first series set's metric meta
    pub fn granularity(&self) -> Result<Granularity> {
        if let Some(spec) = &self.gran {
            return Granularity::from_spec(spec);
        }
        let meta = self
            .series_sets
            .iter()
            .find_map(|s| s.metric_meta.as_ref())
            .ok_or_else(|| CoreError::InvalidRequest("granularity is not specified".to_string()))?;
        let name = meta
            .granularity_name
            .as_deref()
            .ok_or_else(|| CoreError::InvalidRequest("granularityName is missing".to_string()))?;
        Granularity::from_name(name, meta.granularity_amount.unwrap_or(0))
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::InvalidTime(format!("{}: {}", raw, e)))
}
