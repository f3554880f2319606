use crate::AppState;
use axum::Router;

pub mod health;
pub mod models;
pub mod parameters;

/// Merge all routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .nest("/models", models::routes())
        .merge(parameters::routes())
}
