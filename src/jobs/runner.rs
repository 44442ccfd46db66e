//! Job runner
//!
//! Starts every download as its own tokio task and drives it through
//! `pending → configuring → downloading → finalizing → ready | error | cancelled`.
//! A second, supervising task waits on the first so that a panic ends up as a
//! recorded job error instead of a job stuck in `downloading` forever.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, error, info, info_span, warn};
use ulid::Ulid;
use url::Url;

use super::JobError;
use super::models::{Job, JobStatus};
use super::reporter::ProgressReporter;
use super::store::JobStore;
use crate::extractor::{BEST_FORMAT, DownloadOptions, Extractor, ExtractorError};

/// Combined best video and audio, preferring an mp4/m4a pair
const BEST_COMBINED: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best";
const SINGLE_TEMPLATE: &str = "%(title)s.%(ext)s";
const PLAYLIST_TEMPLATE: &str = "%(playlist)s/%(playlist_index)s - %(title)s.%(ext)s";
const MERGE_FORMAT: &str = "mp4";

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Parent directory of every job's private temp directory
    pub work_root: PathBuf,
    /// Abort downloads running longer than this
    pub download_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub url: String,
    pub format: String,
    pub is_playlist: bool,
}

impl DownloadOptions {
    /// Extractor options for a job.
    ///
    /// Playlists always use the best combined format; a single item uses the
    /// best combination for [`BEST_FORMAT`], otherwise the requested video
    /// format plus the best audio, falling back to the best overall.
    pub fn for_job(format: &str, is_playlist: bool) -> Self {
        if is_playlist {
            return Self {
                format: BEST_COMBINED.to_string(),
                output_template: PLAYLIST_TEMPLATE.to_string(),
                merge_output_format: MERGE_FORMAT.to_string(),
                playlist: true,
                ignore_errors: true,
            };
        }

        let format = if format.is_empty() || format == BEST_FORMAT {
            BEST_COMBINED.to_string()
        } else {
            format!("{format}+bestaudio/best")
        };

        Self {
            format,
            output_template: SINGLE_TEMPLATE.to_string(),
            merge_output_format: MERGE_FORMAT.to_string(),
            playlist: false,
            ignore_errors: false,
        }
    }
}

/// Input validation happens before any job exists
pub fn validate_url(raw: &str) -> Result<Url, JobError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(JobError::InvalidUrl("missing URL".to_string()));
    }
    let url = Url::parse(raw).map_err(|e| JobError::InvalidUrl(format!("{raw}: {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(JobError::InvalidUrl(format!("{raw}: only http(s) URLs are supported"))),
    }
}

#[derive(Clone)]
pub struct JobRunner {
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn Extractor>,
    config: Arc<RunnerConfig>,
}

impl JobRunner {
    pub fn new(
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn Extractor>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            config: Arc::new(config),
        }
    }

    /// Creates a job and starts downloading it in the background.
    ///
    /// Returns as soon as the task is spawned. The work root must already
    /// exist.
    pub fn start(&self, request: StartRequest) -> Result<Ulid, JobError> {
        let url = validate_url(&request.url)?;

        let work_dir = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(&self.config.work_root)?;

        let job = Job::new(
            url.as_str(),
            request.format.clone(),
            request.is_playlist,
            work_dir,
        );
        let id = self.store.insert(job);
        info!(
            id = %id,
            url = %url,
            format = %request.format,
            playlist = request.is_playlist,
            "Download job created"
        );

        let request = StartRequest {
            url: url.into(),
            ..request
        };
        let runner = self.clone();
        tokio::spawn(async move { runner.supervise(id, request).await });

        Ok(id)
    }

    /// Requests cancellation. Returns false if the job doesn't exist.
    pub fn cancel(&self, id: &Ulid) -> bool {
        match self.store.cancel_token(id) {
            Some(token) => {
                info!(id = %id, "Cancellation requested");
                token.cancel();
                true
            }
            None => {
                warn!(id = %id, "Attempted to cancel unknown job");
                false
            }
        }
    }

    async fn supervise(self, id: Ulid, request: StartRequest) {
        let span = info_span!("job", id = %id);
        let task = tokio::spawn(self.clone().run(id, request).instrument(span));

        if let Err(e) = task.await {
            error!(id = %id, error = %e, "Download task aborted");
            self.store
                .update(&id, |job| job.fail("Internal error: download task aborted"));
        }

        self.reclaim_if_failed(&id);
    }

    async fn run(self, id: Ulid, request: StartRequest) {
        let (Some(cancel), Some(work_dir)) = (self.store.cancel_token(&id), self.store.work_dir(&id))
        else {
            warn!("Job vanished before it started");
            return;
        };

        if cancel.is_cancelled() {
            self.store.update(&id, Job::mark_cancelled);
            return;
        }

        self.store
            .update(&id, |job| job.set_status(JobStatus::Configuring));
        let options = DownloadOptions::for_job(&request.format, request.is_playlist);
        debug!(?options, "Extractor options");

        self.store
            .update(&id, |job| job.set_status(JobStatus::Downloading));
        let reporter = ProgressReporter::new(
            id,
            self.store.clone(),
            cancel.clone(),
            work_dir.path().to_path_buf(),
            request.is_playlist,
        );

        info!("Starting download");
        let download = self.extractor.download(
            &request.url,
            work_dir.path(),
            &options,
            &reporter,
            &cancel,
        );
        let result = match self.config.download_timeout {
            Some(limit) => match tokio::time::timeout(limit, download).await {
                Ok(result) => result,
                Err(_) => Err(ExtractorError::TimedOut(limit)),
            },
            None => download.await,
        };

        match result {
            Ok(()) => {
                self.store.update(&id, |job| {
                    if job.is_terminal() {
                        return;
                    }
                    if cancel.is_cancelled() {
                        job.mark_cancelled();
                    } else {
                        job.fail("Download produced no output.");
                    }
                });
            }
            Err(ExtractorError::Cancelled) => {
                info!("Download cancelled");
                self.store.update(&id, Job::mark_cancelled);
            }
            Err(ExtractorError::TimedOut(limit)) => {
                error!(?limit, "Download timed out");
                self.store
                    .update(&id, |job| job.fail(format!("Download timed out after {limit:?}")));
            }
            Err(e) => {
                error!(error = %e, "Download failed");
                self.store
                    .update(&id, |job| job.fail(format!("Download error: {e}")));
            }
        }

        if let Some(job) = self.store.get(&id) {
            info!(status = ?job.status, "Download task finished");
        }
    }

    /// Failed and cancelled jobs give their disk space back right away
    fn reclaim_if_failed(&self, id: &Ulid) {
        let Some(job) = self.store.get(id) else {
            return;
        };
        if !matches!(job.status, JobStatus::Error | JobStatus::Cancelled) {
            return;
        }
        let Some(work_dir) = self.store.work_dir(id) else {
            return;
        };
        match work_dir.release() {
            Ok(true) => debug!(id = %id, "Work directory reclaimed"),
            Ok(false) => {}
            Err(e) => debug!(id = %id, error = %e, "Failed to reclaim work directory"),
        }
    }
}
