use async_trait::async_trait;
use tracing::debug;

use super::{InferenceContext, ModelPlugin, PluginError, TrainContext};

/// Plugin that accepts everything and computes nothing
#[derive(Debug, Clone, Default)]
pub struct DefaultPlugin;

#[async_trait]
impl ModelPlugin for DefaultPlugin {
    fn name(&self) -> &str {
        "default"
    }

    async fn train(&self, ctx: TrainContext) -> Result<(), PluginError> {
        debug!(tenant = %ctx.tenant, model_id = %ctx.model_id, "default plugin: nothing to train");
        Ok(())
    }

    async fn inference(&self, ctx: InferenceContext) -> Result<(), PluginError> {
        debug!(tenant = %ctx.tenant, model_id = %ctx.model_id, "default plugin: nothing to infer");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tsplug_core::PluginRequest;

    #[test]
    fn test_time_range_defaults() {
        let plugin = DefaultPlugin;
        let mut request = PluginRequest::for_instance("I1", serde_json::json!({}));
        assert!(plugin.inference_time_range(&request).unwrap().is_empty());

        request.end_time = Some("2020-04-20T00:00:00Z".to_string());
        assert_eq!(
            plugin.inference_time_range(&request).unwrap(),
            vec![Utc.with_ymd_and_hms(2020, 4, 20, 0, 0, 0).unwrap()]
        );

        request.start_time = Some("2020-04-18T00:00:00Z".to_string());
        request.gran = Some(tsplug_core::GranSpec {
            granularity_string: "Daily".to_string(),
            custom_in_seconds: None,
        });
        assert_eq!(plugin.inference_time_range(&request).unwrap().len(), 3);
    }

    #[test]
    fn test_bad_end_time_is_rejected() {
        let mut request = PluginRequest::for_instance("I1", serde_json::json!({}));
        request.end_time = Some("yesterday".to_string());
        assert!(matches!(
            DefaultPlugin.inference_time_range(&request),
            Err(PluginError::Request(_))
        ));
    }
}
