use axum::{Router, routing::get};

use super::AppState;

pub mod jobs;

pub fn api_router() -> Router<AppState> {
    Router::new().route("/jobs", get(jobs::list_jobs))
}
