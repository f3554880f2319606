use axum::Router;
use axum::http::HeaderValue;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tsplug::PluginService;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod config;
pub mod extract;
pub mod response;
pub mod routes;

pub use config::{ApiConfig, CorsConfig};

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub service: PluginService,
}

impl AppState {
    pub fn new(service: PluginService) -> Self {
        Self { service }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::models::train_model,
        crate::routes::models::inference_model,
        crate::routes::models::model_state,
        crate::routes::models::delete_model,
        crate::routes::models::list_models,
        crate::routes::parameters::verify_parameters,
    ),
    components(
        schemas(
            crate::routes::health::HealthResponse,
            crate::response::ModelResponse,
            crate::response::ResultStatus,
            crate::response::PanicResponse,
            crate::routes::models::ModelSummaryDto,
            crate::routes::models::ListModelsResponse,
            crate::routes::models::PluginRequestDoc,
            crate::routes::models::InstanceDoc,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "models", description = "Model training, inference and lifecycle"),
        (name = "parameters", description = "Request verification")
    )
)]
pub struct ApiDoc;

/// Build API application
pub fn build_app(state: AppState, config: &ApiConfig) -> Router {
    let mut router = Router::new().merge(routes::routes());
    if config.enable_swagger {
        router = router
            .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }
    router
        .layer(cors_layer(&config.cors))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(response::panic_response))
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    if config.allow_any_origin {
        return CorsLayer::permissive();
    }
    let origins = config
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect::<Vec<HeaderValue>>();
    CorsLayer::new().allow_origin(AllowOrigin::list(origins))
}
