//! Response envelope shared by every model endpoint

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::any::Any;
use tracing::{error, warn};
use tsplug::{ModelState, ServiceError};
use utoipa::ToSchema;

pub const UNKNOWN_ERROR: &str = "Unknown error, please check your request. ";
pub const TASK_CREATION_FAILED: &str = "Fail to create new task ";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, ToSchema, PartialEq, Eq)]
pub enum ResultStatus {
    Success,
    Fail,
}

/// Envelope returned by train, inference, state, delete and verify
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    pub instance_id: String,
    pub model_id: String,
    pub result: ResultStatus,
    pub message: String,
    #[schema(value_type = String, example = "Training")]
    pub model_state: ModelState,
}

/// Body of the 502 returned when a handler panics
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PanicResponse {
    pub result: ResultStatus,
    pub message: String,
}

/// An envelope paired with its status code
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub body: ModelResponse,
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl Reply {
    pub fn success(
        status: StatusCode,
        instance_id: impl Into<String>,
        model_id: impl Into<String>,
        message: impl Into<String>,
        model_state: ModelState,
    ) -> Self {
        Self {
            status,
            body: ModelResponse {
                instance_id: instance_id.into(),
                model_id: model_id.into(),
                result: ResultStatus::Success,
                message: message.into(),
                model_state,
            },
        }
    }

    pub fn failure(
        status: StatusCode,
        instance_id: impl Into<String>,
        model_id: impl Into<String>,
        message: impl Into<String>,
        model_state: ModelState,
    ) -> Self {
        Self {
            status,
            body: ModelResponse {
                instance_id: instance_id.into(),
                model_id: model_id.into(),
                result: ResultStatus::Fail,
                message: message.into(),
                model_state,
            },
        }
    }

    /// Map a service error onto the envelope.
    ///
    /// `on_validation` is the state reported for rejected requests; it
    /// differs per endpoint.
    pub fn from_error(
        error: &ServiceError,
        instance_id: impl Into<String>,
        model_id: impl Into<String>,
        on_validation: ModelState,
    ) -> Self {
        let (instance_id, model_id) = (instance_id.into(), model_id.into());
        if !error.is_client_error() {
            error!(model_id = %model_id, error = %error, "request failed");
            return Self::failure(
                StatusCode::BAD_GATEWAY,
                instance_id,
                model_id,
                format!("{}{}", UNKNOWN_ERROR, error),
                ModelState::Failed,
            );
        }

        warn!(model_id = %model_id, error = %error, "request rejected");
        let (message, state) = match error {
            ServiceError::NotFound(_) | ServiceError::AdmissionRejected(_) => {
                (error.to_string(), ModelState::Deleted)
            }
            ServiceError::NotReady(state) => (error.to_string(), *state),
            ServiceError::Validation(_) => (error.to_string(), on_validation),
            ServiceError::Dispatch(e) => {
                (format!("{}{}", TASK_CREATION_FAILED, e), ModelState::Failed)
            }
            _ => (error.to_string(), ModelState::Failed),
        };
        Self::failure(StatusCode::BAD_REQUEST, instance_id, model_id, message, state)
    }

    /// A body that could not be read as a plugin request
    pub fn bad_body(rejection: &JsonRejection, model_id: impl Into<String>) -> Self {
        Self::failure(
            StatusCode::BAD_REQUEST,
            "",
            model_id,
            format!("Invalid request body: {}", rejection.body_text()),
            ModelState::Failed,
        )
    }
}

/// Turn a handler panic into the generic failure body
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(detail = %detail, "handler panicked");

    (
        StatusCode::BAD_GATEWAY,
        Json(PanicResponse {
            result: ResultStatus::Fail,
            message: format!("{}{}", UNKNOWN_ERROR, detail),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsplug::{DispatchError, ModelError};

    #[test]
    fn test_not_found_reports_deleted() {
        let reply = Reply::from_error(
            &ServiceError::NotFound("Model is not found!".to_string()),
            "",
            "m1",
            ModelState::Failed,
        );
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body.result, ResultStatus::Fail);
        assert_eq!(reply.body.model_state, ModelState::Deleted);
        assert_eq!(reply.body.message, "Model is not found!");
    }

    #[test]
    fn test_not_ready_reports_current_state() {
        let reply = Reply::from_error(
            &ServiceError::NotReady(ModelState::Training),
            "inst",
            "m1",
            ModelState::Ready,
        );
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body.model_state, ModelState::Training);
        assert_eq!(
            reply.body.message,
            "Cannot do inference right now, status is Training"
        );
    }

    #[test]
    fn test_validation_uses_endpoint_state() {
        let reply = Reply::from_error(
            &ServiceError::Validation("Verify failed! bad".to_string()),
            "inst",
            "",
            ModelState::Deleted,
        );
        assert_eq!(reply.body.model_state, ModelState::Deleted);
        assert_eq!(reply.body.instance_id, "inst");
    }

    #[test]
    fn test_dispatch_failure_is_task_creation_failure() {
        let reply = Reply::from_error(
            &ServiceError::Dispatch(DispatchError::QueueFull),
            "inst",
            "",
            ModelState::Deleted,
        );
        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert!(reply.body.message.starts_with(TASK_CREATION_FAILED));
        assert_eq!(reply.body.model_state, ModelState::Failed);
    }

    #[test]
    fn test_internal_errors_are_bad_gateway() {
        let reply = Reply::from_error(
            &ServiceError::Repository(ModelError::DatabaseError("gone".to_string())),
            "",
            "m1",
            ModelState::Failed,
        );
        assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
        assert!(reply.body.message.starts_with(UNKNOWN_ERROR));
        assert_eq!(reply.body.model_state, ModelState::Failed);
    }

    #[test]
    fn test_panic_response_is_bad_gateway() {
        let response = panic_response(Box::new("boom"));
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }
}
