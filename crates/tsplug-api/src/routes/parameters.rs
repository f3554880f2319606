use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::post,
};
use tsplug::{ModelState, PluginRequest, service::VERIFY_SUCCEEDED};

use crate::AppState;
use crate::extract::Tenant;
use crate::response::{ModelResponse, Reply};

pub fn routes() -> Router<AppState> {
    Router::new().route("/parameters", post(verify_parameters))
}

/// Check a request without creating anything
#[utoipa::path(
    post,
    path = "/parameters",
    request_body = crate::routes::models::PluginRequestDoc,
    params(
        ("apim-subscription-id" = Option<String>, Header, description = "Tenant; defaults to Official")
    ),
    responses(
        (status = 200, description = "Request is valid", body = ModelResponse),
        (status = 400, description = "Request is invalid", body = ModelResponse)
    ),
    tag = "parameters"
)]
pub async fn verify_parameters(
    State(state): State<AppState>,
    Tenant(tenant): Tenant,
    body: Result<Json<PluginRequest>, JsonRejection>,
) -> Reply {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return Reply::bad_body(&rejection, ""),
    };
    let instance_id = request.instance_id().to_string();

    match state.service.verify(&tenant, &request).await {
        Ok(()) => Reply::success(
            StatusCode::OK,
            instance_id,
            "",
            VERIFY_SUCCEEDED,
            ModelState::Deleted,
        ),
        Err(e) => Reply::from_error(&e, instance_id, "", ModelState::Deleted),
    }
}
