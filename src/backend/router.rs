use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use super::AppState;
use super::api::{api_router, jobs};
use super::pages;

/// Create the main backend router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Page and form endpoints
        .route("/", get(pages::index))
        .route("/analyze", post(pages::analyze))
        .route("/start_download", post(pages::start_download))
        // Job endpoints polled by the page
        .route("/cancel_download/{id}", post(jobs::cancel_download))
        .route("/progress/{id}", get(jobs::progress))
        .route("/serve_file/{id}", get(jobs::serve_file))
        .route("/healthz", get(|| async { "ok" }))
        .nest("/api", api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
