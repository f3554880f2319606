use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tsplug::{ModelId, ModelState, ModelSummary, PluginRequest, ServiceError, service::VERIFY_FAILED};
use utoipa::ToSchema;

use crate::AppState;
use crate::extract::Tenant;
use crate::response::{ModelResponse, Reply};

/// Calling instance, as documented for the request body
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDoc {
    pub instance_id: String,
    pub instance_name: Option<String>,
    #[schema(value_type = Object)]
    pub params: serde_json::Value,
}

/// Request body shared by train, inference and verify.
///
/// Fields not listed here are passed through to the plugin.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PluginRequestDoc {
    pub instance: InstanceDoc,
    #[schema(value_type = Vec<Object>)]
    pub series_sets: Vec<serde_json::Value>,
    #[schema(value_type = Option<Object>)]
    pub gran: Option<serde_json::Value>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
}

/// API representation of a model record
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummaryDto {
    pub model_id: String,
    pub instance_id: String,
    #[schema(value_type = String, example = "Ready")]
    pub state: ModelState,
    pub time_key: String,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<ModelSummary> for ModelSummaryDto {
    fn from(summary: ModelSummary) -> Self {
        Self {
            model_id: summary.model_id,
            instance_id: summary.instance_id,
            state: summary.state,
            time_key: summary.time_key,
            last_error: summary.last_error,
            created_at: summary.created_at.to_rfc3339(),
            updated_at: summary.updated_at.to_rfc3339(),
        }
    }
}

/// Response for listing models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ListModelsResponse {
    pub models: Vec<ModelSummaryDto>,
    pub total: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_models))
        .route("/train", post(train_model))
        .route("/{model_id}", get(model_state).delete(delete_model))
        .route("/{model_id}/inference", post(inference_model))
}

/// Start training a new model
#[utoipa::path(
    post,
    path = "/models/train",
    request_body = PluginRequestDoc,
    params(
        ("apim-subscription-id" = Option<String>, Header, description = "Tenant; defaults to Official")
    ),
    responses(
        (status = 201, description = "Training task created", body = ModelResponse),
        (status = 400, description = "Rejected by verification or admission", body = ModelResponse),
        (status = 502, description = "Unexpected failure", body = ModelResponse)
    ),
    tag = "models"
)]
pub async fn train_model(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    body: Result<Json<PluginRequest>, JsonRejection>,
) -> Reply {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return Reply::bad_body(&rejection, ""),
    };
    let instance_id = request.instance_id().to_string();

    match state.service.train(&tenant, request).await {
        Ok(created) => Reply::success(
            StatusCode::CREATED,
            created.instance_id,
            created.model_id.to_string(),
            created.message,
            created.state,
        ),
        Err(e) => Reply::from_error(&e, instance_id, "", ModelState::Deleted),
    }
}

/// Run inference with a Ready model
#[utoipa::path(
    post,
    path = "/models/{model_id}/inference",
    request_body = PluginRequestDoc,
    params(
        ("model_id" = String, Path, description = "Model ID"),
        ("apim-subscription-id" = Option<String>, Header, description = "Tenant; defaults to Official")
    ),
    responses(
        (status = 201, description = "Inference task created", body = ModelResponse),
        (status = 400, description = "Model missing, not ready or request inconsistent", body = ModelResponse),
        (status = 502, description = "Unexpected failure", body = ModelResponse)
    ),
    tag = "models"
)]
pub async fn inference_model(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(model_id): Path<String>,
    body: Result<Json<PluginRequest>, JsonRejection>,
) -> Reply {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return Reply::bad_body(&rejection, model_id),
    };
    let instance_id = request.instance_id().to_string();

    match state
        .service
        .inference(&tenant, &ModelId::from_string(model_id.clone()), request)
        .await
    {
        Ok(created) => Reply::success(
            StatusCode::CREATED,
            created.instance_id,
            created.model_id.to_string(),
            created.message,
            created.state,
        ),
        Err(e) => {
            // Only a Ready model gets as far as the consistency check
            let on_validation = match &e {
                ServiceError::Validation(message) if message.starts_with(VERIFY_FAILED) => {
                    ModelState::Failed
                }
                _ => ModelState::Ready,
            };
            Reply::from_error(&e, instance_id, model_id, on_validation)
        }
    }
}

/// Current state of a model
#[utoipa::path(
    get,
    path = "/models/{model_id}",
    params(
        ("model_id" = String, Path, description = "Model ID"),
        ("apim-subscription-id" = Option<String>, Header, description = "Tenant; defaults to Official")
    ),
    responses(
        (status = 200, description = "Model state", body = ModelResponse),
        (status = 400, description = "Model not found", body = ModelResponse)
    ),
    tag = "models"
)]
pub async fn model_state(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(model_id): Path<String>,
) -> Reply {
    match state
        .service
        .state(&tenant, &ModelId::from_string(model_id.clone()))
        .await
    {
        Ok(record) => Reply::success(
            StatusCode::OK,
            "",
            model_id,
            record.last_error.unwrap_or_default(),
            record.state,
        ),
        Err(e) => Reply::from_error(&e, "", model_id, ModelState::Failed),
    }
}

/// Delete a model and its artifacts
#[utoipa::path(
    delete,
    path = "/models/{model_id}",
    params(
        ("model_id" = String, Path, description = "Model ID"),
        ("apim-subscription-id" = Option<String>, Header, description = "Tenant; defaults to Official")
    ),
    responses(
        (status = 200, description = "Model deleted", body = ModelResponse),
        (status = 400, description = "Model not found or backend refused", body = ModelResponse)
    ),
    tag = "models"
)]
pub async fn delete_model(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    Path(model_id): Path<String>,
) -> Reply {
    match state
        .service
        .delete(&tenant, &ModelId::from_string(model_id.clone()))
        .await
    {
        Ok(record) => Reply::success(
            StatusCode::OK,
            "",
            model_id.clone(),
            format!("Model {} has been deleted", model_id),
            record.state,
        ),
        Err(e) => Reply::from_error(&e, "", model_id, ModelState::Failed),
    }
}

/// All models of the calling tenant, newest first
#[utoipa::path(
    get,
    path = "/models",
    params(
        ("apim-subscription-id" = Option<String>, Header, description = "Tenant; defaults to Official")
    ),
    responses(
        (status = 200, description = "List of models", body = ListModelsResponse),
        (status = 502, description = "Metadata store unavailable", body = ModelResponse)
    ),
    tag = "models"
)]
pub async fn list_models(State(state): State<AppState>, Tenant(tenant): Tenant) -> Response {
    match state.service.list(&tenant).await {
        Ok(summaries) => {
            let models: Vec<ModelSummaryDto> =
                summaries.into_iter().map(ModelSummaryDto::from).collect();
            let total = models.len();
            Json(ListModelsResponse { models, total }).into_response()
        }
        Err(e) => Reply::from_error(&e, "", "", ModelState::Failed).into_response(),
    }
}
