//! The HTML page and the form endpoints posting to it
//!
//! Form handlers never render errors themselves; they redirect back to `/`
//! with an `error` query parameter so a reload doesn't resubmit the form.

use axum::{
    Form,
    extract::{Query, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tera::Context;
use tracing::{info, warn};

use super::{AppState, INDEX_TEMPLATE, WebResult};
use crate::extractor::{BEST_FORMAT, MediaInfo};
use crate::jobs::{JobError, StartRequest, runner::validate_url};

#[derive(Debug, Default, Deserialize)]
pub struct IndexQuery {
    pub job_id: Option<String>,
    pub url_analyzed: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeForm {
    pub url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StartDownloadForm {
    pub url: Option<String>,
    pub format_code: Option<String>,
    pub is_playlist: Option<String>,
}

/// `303 See Other` to the page with the given query parameters
fn redirect_home(params: &[(&str, &str)]) -> Response {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    Redirect::to(&format!("/?{query}")).into_response()
}

fn redirect_error(message: &str) -> Response {
    redirect_home(&[("error", message)])
}

fn page_context(url_analyzed: Option<&str>) -> Context {
    let mut context = Context::new();
    context.insert("url_analyzed", url_analyzed.unwrap_or_default());
    context.insert("error", &None::<String>);
    context.insert("job_id", &None::<String>);
    context.insert("video", &None::<()>);
    context.insert("playlist", &None::<()>);
    context
}

fn render(state: &AppState, context: &Context) -> WebResult<Html<String>> {
    Ok(Html(state.templates.render(INDEX_TEMPLATE, context)?))
}

/// `true` the way the page's hidden field spells it
fn form_flag(value: Option<&str>) -> bool {
    value.is_some_and(|value| value.eq_ignore_ascii_case("true"))
}

pub async fn index(
    State(state): State<AppState>,
    Query(query): Query<IndexQuery>,
) -> WebResult<Html<String>> {
    let mut context = page_context(query.url_analyzed.as_deref());
    context.insert("error", &query.error);
    context.insert("job_id", &query.job_id);
    render(&state, &context)
}

pub async fn analyze(
    State(state): State<AppState>,
    Form(form): Form<AnalyzeForm>,
) -> WebResult<Response> {
    let Some(url) = form.url.filter(|url| !url.trim().is_empty()) else {
        return Ok(redirect_error("Please provide a valid URL."));
    };
    if let Err(e) = validate_url(&url) {
        return Ok(redirect_error(&e.to_string()));
    }

    let info = match state.extractor.analyze(url.trim()).await {
        Ok(info) => info,
        Err(e) => {
            warn!(url = %url, error = %e, "Analysis failed");
            return Ok(redirect_error(&format!(
                "Analysis error: invalid URL or unavailable video. ({e})"
            )));
        }
    };

    let mut context = page_context(Some(url.trim()));
    match &info {
        MediaInfo::Playlist(playlist) => {
            info!(url = %url, title = %playlist.title, "Analyzed playlist");
            context.insert("playlist", playlist);
        }
        MediaInfo::Single(video) => {
            info!(url = %url, title = %video.title, formats = video.formats.len(), "Analyzed video");
            context.insert("video", video);
        }
    }
    Ok(render(&state, &context)?.into_response())
}

pub async fn start_download(
    State(state): State<AppState>,
    Form(form): Form<StartDownloadForm>,
) -> WebResult<Response> {
    let Some(url) = form.url.filter(|url| !url.trim().is_empty()) else {
        return Ok(redirect_error("Missing download URL."));
    };

    let request = StartRequest {
        url: url.clone(),
        format: form
            .format_code
            .filter(|code| !code.is_empty())
            .unwrap_or_else(|| BEST_FORMAT.to_string()),
        is_playlist: form_flag(form.is_playlist.as_deref()),
    };

    match state.runner.start(request) {
        Ok(id) => {
            let id = id.to_string();
            Ok(redirect_home(&[
                ("job_id", id.as_str()),
                ("url_analyzed", url.as_str()),
            ]))
        }
        Err(e @ JobError::InvalidUrl(_)) => Ok(redirect_error(&e.to_string())),
        Err(e) => Err(e.into()),
    }
}
