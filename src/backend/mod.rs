//! HTTP layer
//!
//! A single HTML page rendered with Tera, form endpoints that redirect back
//! to it, and the JSON endpoints the page polls.

pub mod api;
pub mod pages;
pub mod router;

use std::sync::Arc;

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde::Serialize;
use tera::Tera;

use crate::extractor::Extractor;
use crate::jobs::{JobError, JobRunner, JobStore, RetrievalCoordinator};

pub use router::create_router;

const INDEX_TEMPLATE: &str = "index.html";

/// Everything the handlers need, cloned into each request
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub runner: JobRunner,
    pub retrieval: RetrievalCoordinator,
    pub extractor: Arc<dyn Extractor>,
    pub templates: Arc<Tera>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: JobRunner,
        retrieval: RetrievalCoordinator,
        extractor: Arc<dyn Extractor>,
    ) -> Result<Self, tera::Error> {
        Ok(Self {
            store,
            runner,
            retrieval,
            extractor,
            templates: Arc::new(templates()?),
        })
    }
}

/// Templates are compiled into the binary
pub fn templates() -> Result<Tera, tera::Error> {
    let mut tera = Tera::default();
    tera.add_raw_template(INDEX_TEMPLATE, include_str!("../../templates/index.html"))?;
    Ok(tera)
}

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub status: &'static str,
    pub message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("template error: {0}")]
    Template(#[from] tera::Error),

    #[error("failed to build response: {0}")]
    Http(#[from] http::Error),

    #[error(transparent)]
    Job(#[from] JobError),
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Job(JobError::InvalidUrl(_)) => StatusCode::BAD_REQUEST,
            Error::Job(JobError::NotFound(_)) => StatusCode::NOT_FOUND,
            Error::Template(_) | Error::Http(_) | Error::Job(JobError::Io(_)) => {
                tracing::error!(error = %self, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(StatusMessage {
            status: "error",
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

pub type WebResult<T> = Result<T, Error>;
