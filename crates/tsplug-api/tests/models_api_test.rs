use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tower::util::ServiceExt;
use tsplug::{
    DefaultPlugin, InMemoryModelRepository, InMemorySink, InferenceContext, ModelPlugin,
    PluginError, PluginRequest, PluginService, ServiceConfig, TenantId, TrainContext,
};
use tsplug_api::{ApiConfig, AppState, build_app};

/// Verification blows up; exercises the panic boundary
struct PanickingPlugin;

#[async_trait]
impl ModelPlugin for PanickingPlugin {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn verify(&self, _tenant: &TenantId, _request: &PluginRequest) -> Result<(), PluginError> {
        panic!("verify exploded");
    }

    async fn train(&self, _ctx: TrainContext) -> Result<(), PluginError> {
        Ok(())
    }

    async fn inference(&self, _ctx: InferenceContext) -> Result<(), PluginError> {
        Ok(())
    }
}

/// Create a test application backed by temporary directories
fn create_test_app(plugin: Arc<dyn ModelPlugin>, training_limit: usize) -> (axum::Router, TempDir) {
    let dir = TempDir::new().unwrap();
    let root = dir.path();
    let service_config = ServiceConfig {
        model_temp_dir: root.join("temp").display().to_string(),
        model_dir: root.join("models").display().to_string(),
        model_cache_dir: root.join("cache").display().to_string(),
        models_in_training_limit_per_instance: training_limit,
        worker_count: 2,
        ..Default::default()
    };
    let service = PluginService::from_config(
        plugin,
        Arc::new(InMemoryModelRepository::new()),
        Arc::new(InMemorySink::new()),
        service_config.clone(),
    );
    let config = ApiConfig {
        enable_swagger: false,
        service: service_config,
        ..Default::default()
    };
    (build_app(AppState::new(service), &config), dir)
}

fn default_app() -> (axum::Router, TempDir) {
    create_test_app(Arc::new(DefaultPlugin), 10)
}

fn request_body(instance_id: &str, params: Value) -> Value {
    json!({
        "instance": { "instanceId": instance_id, "params": params },
        "seriesSets": []
    })
}

/// Helper function to make JSON requests
async fn json_request(
    app: &axum::Router,
    method: &str,
    uri: &str,
    tenant: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request_builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(tenant) = tenant {
        request_builder = request_builder.header("apim-subscription-id", tenant);
    }

    let request = if let Some(body) = body {
        request_builder
            .body(Body::from(serde_json::to_string(&body).unwrap()))
            .unwrap()
    } else {
        request_builder.body(Body::empty()).unwrap()
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();

    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body_value: Value = if body_bytes.is_empty() {
        json!(null)
    } else {
        match serde_json::from_slice(&body_bytes) {
            Ok(json) => json,
            Err(_) => json!(String::from_utf8_lossy(&body_bytes).to_string()),
        }
    };

    (status, body_value)
}

/// Train a model and wait until it leaves Training
async fn trained_model(app: &axum::Router, params: Value) -> String {
    let (status, body) = json_request(
        app,
        "POST",
        "/models/train",
        None,
        Some(request_body("inst-1", params)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let model_id = body["modelId"].as_str().unwrap().to_string();

    for _ in 0..200 {
        let (_, body) = json_request(app, "GET", &format!("/models/{}", model_id), None, None).await;
        if body["modelState"] != "Training" {
            assert_eq!(body["modelState"], "Ready");
            return model_id;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("model {} never finished training", model_id);
}

#[tokio::test]
async fn test_health() {
    let (app, _dir) = default_app();

    let (status, body) = json_request(&app, "GET", "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["plugin"], "default");
}

#[tokio::test]
async fn test_train_creates_task() {
    let (app, _dir) = default_app();

    let (status, body) = json_request(
        &app,
        "POST",
        "/models/train",
        None,
        Some(request_body("inst-1", json!({"window": 3}))),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["result"], "Success");
    assert_eq!(body["instanceId"], "inst-1");
    assert_eq!(body["message"], "Training task created");
    assert_eq!(body["modelState"], "Training");
    assert!(!body["modelId"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_train_rejected_when_limit_reached() {
    let (app, _dir) = create_test_app(Arc::new(DefaultPlugin), 0);

    let (status, body) = json_request(
        &app,
        "POST",
        "/models/train",
        None,
        Some(request_body("inst-1", json!({}))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["result"], "Fail");
    assert_eq!(body["modelId"], "");
    assert_eq!(body["modelState"], "Deleted");
    assert_eq!(
        body["message"],
        "Models in training limit reached! Abort training this time."
    );
}

#[tokio::test]
async fn test_state_of_trained_model() {
    let (app, _dir) = default_app();
    let model_id = trained_model(&app, json!({})).await;

    let (status, body) = json_request(&app, "GET", &format!("/models/{}", model_id), None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "Success");
    assert_eq!(body["instanceId"], "");
    assert_eq!(body["modelId"], model_id.as_str());
    assert_eq!(body["modelState"], "Ready");
}

#[tokio::test]
async fn test_unknown_model_is_not_found() {
    let (app, _dir) = default_app();

    let (status, body) = json_request(&app, "GET", "/models/missing", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Model is not found!");
    assert_eq!(body["modelState"], "Deleted");

    let (status, body) = json_request(
        &app,
        "POST",
        "/models/missing/inference",
        None,
        Some(request_body("inst-1", json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["modelId"], "missing");
    assert_eq!(body["modelState"], "Deleted");
}

#[tokio::test]
async fn test_inference_on_ready_model() {
    let (app, _dir) = default_app();
    let model_id = trained_model(&app, json!({"window": 3})).await;

    let (status, body) = json_request(
        &app,
        "POST",
        &format!("/models/{}/inference", model_id),
        None,
        Some(request_body("inst-1", json!({"window": 3}))),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["result"], "Success");
    assert_eq!(body["message"], "Inference task created");
    assert_eq!(body["modelState"], "Ready");
}

#[tokio::test]
async fn test_inference_with_different_params_is_inconsistent() {
    let (app, _dir) = default_app();
    let model_id = trained_model(&app, json!({"window": 3})).await;

    let (status, body) = json_request(
        &app,
        "POST",
        &format!("/models/{}/inference", model_id),
        None,
        Some(request_body("inst-1", json!({"window": 4}))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Inconsistent series sets or params!");
    assert_eq!(body["modelState"], "Ready");
}

#[tokio::test]
async fn test_delete_model() {
    let (app, _dir) = default_app();
    let model_id = trained_model(&app, json!({})).await;

    let (status, body) = json_request(&app, "DELETE", &format!("/models/{}", model_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], format!("Model {} has been deleted", model_id));
    assert_eq!(body["modelState"], "Deleted");

    // Deleted models keep answering state queries
    let (status, body) = json_request(&app, "GET", &format!("/models/{}", model_id), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["modelState"], "Deleted");

    let (status, body) = json_request(&app, "DELETE", &format!("/models/{}", model_id), None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Model is not found!");
}

#[tokio::test]
async fn test_list_is_scoped_by_tenant() {
    let (app, _dir) = default_app();

    let (status, body) = json_request(&app, "GET", "/models", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["models"], json!([]));
    assert_eq!(body["total"], 0);

    let (status, _) = json_request(
        &app,
        "POST",
        "/models/train",
        Some("acme"),
        Some(request_body("inst-1", json!({}))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, body) = json_request(&app, "GET", "/models", Some("acme"), None).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["models"][0]["instanceId"], "inst-1");

    // No header means the default tenant
    let (_, body) = json_request(&app, "GET", "/models", None, None).await;
    assert_eq!(body["total"], 0);
}

#[tokio::test]
async fn test_model_is_invisible_to_other_tenants() {
    let (app, _dir) = default_app();
    let model_id = trained_model(&app, json!({})).await;

    let (status, body) = json_request(
        &app,
        "GET",
        &format!("/models/{}", model_id),
        Some("someone-else"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["modelState"], "Deleted");
}

#[tokio::test]
async fn test_verify_parameters() {
    let (app, _dir) = default_app();

    let (status, body) = json_request(
        &app,
        "POST",
        "/parameters",
        None,
        Some(request_body("inst-9", json!({"window": 3}))),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "Success");
    assert_eq!(body["instanceId"], "inst-9");
    assert_eq!(body["modelId"], "");
    assert_eq!(body["modelState"], "Deleted");
    assert!(body["message"].as_str().unwrap().starts_with("Verify successfully!"));
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let (app, _dir) = default_app();

    let (status, body) = json_request(
        &app,
        "POST",
        "/models/train",
        None,
        Some(json!({"seriesSets": []})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["result"], "Fail");
    assert!(body["message"].as_str().unwrap().starts_with("Invalid request body"));
}

#[tokio::test]
async fn test_panic_becomes_bad_gateway() {
    let (app, _dir) = create_test_app(Arc::new(PanickingPlugin), 10);

    let (status, body) = json_request(
        &app,
        "POST",
        "/parameters",
        None,
        Some(request_body("inst-1", json!({}))),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["result"], "Fail");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("Unknown error, please check your request. ")
    );
}
