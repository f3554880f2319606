//! Request fingerprints
//!
//! A fingerprint is a digest of the canonicalized series sets and instance
//! parameters. It is captured when a model is trained and recomputed on
//! every inference request to detect input drift.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::PluginRequest;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint of a request's series sets and instance parameters
    pub fn of(request: &PluginRequest) -> Self {
        // Serializing typed structs cannot fail: every map key is a string.
        let series = serde_json::to_value(&request.series_sets).unwrap_or(Value::Null);
        let mut canonical = String::new();
        write_canonical(&series, &mut canonical);
        canonical.push('|');
        write_canonical(request.params(), &mut canonical);
        Self(sha256::digest(canonical))
    }

    /// Create from existing string
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Serialize with object keys sorted, independent of map ordering features
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(params: Value, series: Value) -> PluginRequest {
        serde_json::from_value(json!({
            "instance": {"instanceId": "i1", "params": params},
            "seriesSets": series,
            "endTime": "2020-04-18T00:00:00Z"
        }))
        .unwrap()
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let a = request(
            json!({"step": 1, "windowSize": 28}),
            json!([{"metricId": "m1", "dimensionFilter": {"a": "1", "b": "2"}}]),
        );
        let b = request(
            json!({"windowSize": 28, "step": 1}),
            json!([{"dimensionFilter": {"b": "2", "a": "1"}, "metricId": "m1"}]),
        );
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_params_change_fingerprint() {
        let series = json!([{"metricId": "m1"}]);
        let a = request(json!({"step": 1}), series.clone());
        let b = request(json!({"step": 2}), series);
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_series_change_fingerprint() {
        let a = request(json!({}), json!([{"metricId": "m1"}]));
        let b = request(json!({}), json!([{"metricId": "m2"}]));
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn test_time_range_is_not_part_of_fingerprint() {
        let a = request(json!({}), json!([]));
        let mut b = a.clone();
        b.end_time = Some("2021-01-01T00:00:00Z".to_string());
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }
}
