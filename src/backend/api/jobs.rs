//! Job endpoints: polling, cancellation and the one-time file download

use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use http::{StatusCode, header};
use serde::Serialize;
use tokio_util::io::ReaderStream;
use tracing::debug;
use ulid::Ulid;

use crate::backend::{AppState, StatusMessage, WebResult};
use crate::jobs::{Artifact, FAILED_PROGRESS, JobError, JobSnapshot, JobStatus};

const NOT_READY: &str = "File not ready or job not found.";

/// Payload polled by the page while a job runs
#[derive(Debug, Serialize, PartialEq)]
pub struct ProgressResponse {
    pub status: String,
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<String>,
    /// Playlist position, e.g. `2/3`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
}

impl ProgressResponse {
    fn failed(status: &str, error: String) -> Self {
        Self {
            status: status.to_string(),
            progress: FAILED_PROGRESS,
            error: Some(error),
            download_url: None,
            speed: None,
            total_bytes: None,
            item: None,
        }
    }

    pub fn from_job(job: &JobSnapshot) -> Self {
        match job.status {
            JobStatus::Cancelled => Self::failed(
                "cancelled",
                job.error
                    .clone()
                    .unwrap_or_else(|| "Download cancelled by user.".to_string()),
            ),
            JobStatus::Error => Self::failed(
                "error",
                job.error
                    .clone()
                    .unwrap_or_else(|| "Unknown error while processing.".to_string()),
            ),
            JobStatus::Ready => Self {
                status: "done".to_string(),
                progress: 100.0,
                error: None,
                download_url: Some(format!("/serve_file/{}", job.id)),
                speed: None,
                total_bytes: None,
                item: None,
            },
            status => Self {
                status: status.to_string(),
                progress: (job.progress * 10.0).round() / 10.0,
                error: None,
                download_url: None,
                speed: Some(job.speed.clone().unwrap_or_else(|| "N/A".to_string())),
                total_bytes: Some(job.total_size.clone().unwrap_or_else(|| "N/A".to_string())),
                item: job.item.clone(),
            },
        }
    }
}

fn parse_id(raw: &str) -> Option<Ulid> {
    Ulid::from_string(raw).ok()
}

pub async fn progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ProgressResponse>) {
    match parse_id(&id).and_then(|id| state.store.get(&id)) {
        Some(job) => (StatusCode::OK, Json(ProgressResponse::from_job(&job))),
        None => (
            StatusCode::NOT_FOUND,
            Json(ProgressResponse::failed(
                "error",
                "Job not found or expired.".to_string(),
            )),
        ),
    }
}

pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<StatusMessage>) {
    let cancelled = parse_id(&id).is_some_and(|id| state.runner.cancel(&id));
    if cancelled {
        (
            StatusCode::ACCEPTED,
            Json(StatusMessage {
                status: "Cancellation requested",
                message: "The download will stop shortly.".to_string(),
            }),
        )
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(StatusMessage {
                status: "error",
                message: "Job not found or already finished.".to_string(),
            }),
        )
    }
}

/// `Content-Disposition` with an ASCII fallback and the UTF-8 name
pub fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
        urlencoding::encode(name)
    )
}

fn artifact_response(artifact: Artifact) -> WebResult<Response> {
    let Artifact {
        file,
        name,
        content_type,
        len,
        cleanup,
    } = artifact;

    // The guard rides along with the body and fires when the body is dropped
    let stream = ReaderStream::new(file).map(move |chunk| {
        let _guard = &cleanup;
        chunk
    });

    let response = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, len)
        .header(header::CONTENT_DISPOSITION, content_disposition(&name))
        .body(Body::from_stream(stream))?;
    Ok(response)
}

pub async fn serve_file(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Some(id) = parse_id(&id) else {
        return (StatusCode::NOT_FOUND, NOT_READY).into_response();
    };

    match state.retrieval.fetch(&id).await {
        Ok(artifact) => artifact_response(artifact).into_response(),
        Err(JobError::NotFound(_)) => {
            debug!(id = %id, "Refused to serve a job that is not ready");
            (StatusCode::NOT_FOUND, NOT_READY).into_response()
        }
        Err(e) => crate::backend::Error::from(e).into_response(),
    }
}

pub async fn list_jobs(State(state): State<AppState>) -> Json<Vec<JobSnapshot>> {
    Json(state.store.list())
}
