//! Progress reporter
//!
//! The [`ProgressSink`] handed to the extractor for one job. Every event
//! passes through here first, which makes it the place where cancellation is
//! observed during a transfer and where finalization runs once the media is
//! on disk.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use ulid::Ulid;

use super::finalize;
use super::models::{Job, JobStatus};
use super::store::JobStore;
use crate::extractor::{DownloadTick, ExtractorError, ProgressEvent, ProgressSink};
use crate::util::{format_bytes, format_speed};

pub struct ProgressReporter {
    id: Ulid,
    store: Arc<dyn JobStore>,
    cancel: CancellationToken,
    work_dir: PathBuf,
    is_playlist: bool,
}

impl ProgressReporter {
    pub fn new(
        id: Ulid,
        store: Arc<dyn JobStore>,
        cancel: CancellationToken,
        work_dir: PathBuf,
        is_playlist: bool,
    ) -> Self {
        Self {
            id,
            store,
            cancel,
            work_dir,
            is_playlist,
        }
    }

    async fn finalize(&self) {
        let started = self
            .store
            .update(&self.id, |job| job.set_status(JobStatus::Finalizing))
            .unwrap_or(false);
        if !started {
            debug!(id = %self.id, "Job already terminal, skipping finalization");
            return;
        }

        let result = if self.is_playlist {
            finalize::archive_playlist(&self.work_dir).await
        } else {
            finalize::single_output(&self.work_dir).await
        };

        let cancel = &self.cancel;
        match result {
            Ok(artifact) => {
                info!(id = %self.id, name = %artifact.name, "Output ready");
                self.store.update(&self.id, |job| {
                    // A cancel that raced with finalization still wins
                    if cancel.is_cancelled() {
                        job.mark_cancelled();
                    } else {
                        job.complete(artifact.path, artifact.name);
                    }
                });
            }
            Err(e) => {
                error!(id = %self.id, error = %e, "Post-processing failed");
                self.store
                    .update(&self.id, |job| job.fail(format!("Post-processing error: {e}")));
            }
        }
    }
}

/// New progress value for a tick.
///
/// Prefers byte counts, then the fraction, and otherwise keeps `previous`.
/// The result is clamped to `[0, 100]` and never lower than `previous`.
pub fn compute_progress(previous: f64, tick: &DownloadTick) -> f64 {
    let previous = previous.clamp(0.0, 100.0);
    let total = tick.total_bytes.or(tick.total_bytes_estimate);

    let next = match (tick.downloaded_bytes, total) {
        (Some(downloaded), Some(total)) if total > 0 => downloaded as f64 / total as f64 * 100.0,
        _ => match tick.fraction {
            Some(fraction) if fraction.is_finite() => fraction * 100.0,
            _ => previous,
        },
    };

    next.clamp(0.0, 100.0).max(previous)
}

fn apply_tick(job: &mut Job, tick: &DownloadTick) {
    if !job.set_status(JobStatus::Downloading) {
        return;
    }
    job.progress = compute_progress(job.progress, tick);
    job.speed = Some(format_speed(tick.speed));
    job.total_size = Some(format_bytes(tick.total_bytes.or(tick.total_bytes_estimate)));
}

fn start_item(job: &mut Job, index: u32, count: Option<u32>) {
    if !job.set_status(JobStatus::Downloading) {
        return;
    }
    job.progress = 0.0;
    job.item = Some(match count {
        Some(count) => format!("{index}/{count}"),
        None => index.to_string(),
    });
}

#[async_trait]
impl ProgressSink for ProgressReporter {
    async fn on_progress(&self, event: ProgressEvent) -> Result<(), ExtractorError> {
        if self.cancel.is_cancelled() {
            info!(id = %self.id, "Cancellation observed, aborting download");
            self.store.update(&self.id, Job::mark_cancelled);
            return Err(ExtractorError::Cancelled);
        }

        match event {
            ProgressEvent::ItemStarted { index, count } => {
                info!(id = %self.id, index, ?count, "Playlist entry started");
                self.store
                    .update(&self.id, |job| start_item(job, index, count));
            }
            ProgressEvent::Downloading(tick) => {
                trace!(id = %self.id, ?tick, "Progress");
                self.store.update(&self.id, |job| apply_tick(job, &tick));
            }
            ProgressEvent::Finished => {
                debug!(id = %self.id, "Transfer finished, finalizing");
                self.finalize().await;
            }
            ProgressEvent::Error { message } => {
                warn!(id = %self.id, error = %message, "Extractor reported an error");
                self.store.update(&self.id, |job| {
                    job.fail(format!("Download failed in extractor: {message}"))
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::FAILED_PROGRESS;
    use crate::jobs::store::MemoryJobStore;

    fn tick(downloaded: Option<u64>, total: Option<u64>, fraction: Option<f64>) -> DownloadTick {
        DownloadTick {
            downloaded_bytes: downloaded,
            total_bytes: total,
            fraction,
            ..Default::default()
        }
    }

    fn setup(is_playlist: bool) -> (Arc<dyn JobStore>, Ulid, ProgressReporter) {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let job = Job::new("https://example.com", "best", is_playlist, tempfile::tempdir().unwrap());
        let cancel = job.cancel.clone();
        let work_dir = job.work_dir.path().to_path_buf();
        let id = store.insert(job);
        let reporter = ProgressReporter::new(id, store.clone(), cancel, work_dir, is_playlist);
        (store, id, reporter)
    }

    #[test]
    fn progress_from_bytes_then_estimate_then_fraction() {
        assert_eq!(compute_progress(0.0, &tick(Some(50), Some(200), None)), 25.0);

        let estimate = DownloadTick {
            downloaded_bytes: Some(30),
            total_bytes_estimate: Some(60),
            ..Default::default()
        };
        assert_eq!(compute_progress(0.0, &estimate), 50.0);

        assert_eq!(compute_progress(10.0, &tick(None, None, Some(0.4))), 40.0);
        assert_eq!(compute_progress(10.0, &tick(Some(5), Some(0), None)), 10.0);
    }

    #[test]
    fn progress_keeps_previous_without_data() {
        assert_eq!(compute_progress(42.0, &DownloadTick::default()), 42.0);
    }

    #[test]
    fn progress_is_clamped_and_monotonic() {
        assert_eq!(compute_progress(0.0, &tick(Some(300), Some(200), None)), 100.0);
        assert_eq!(compute_progress(60.0, &tick(Some(10), Some(100), None)), 60.0);
        assert_eq!(compute_progress(FAILED_PROGRESS, &tick(None, None, Some(-2.0))), 0.0);
    }

    #[tokio::test]
    async fn ticks_update_job() {
        let (store, id, reporter) = setup(false);
        let event = ProgressEvent::Downloading(DownloadTick {
            downloaded_bytes: Some(512),
            total_bytes: Some(1024),
            speed: Some(512.0),
            ..Default::default()
        });
        reporter.on_progress(event).await.unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Downloading);
        assert_eq!(job.progress, 50.0);
        assert_eq!(job.speed.as_deref(), Some("512 B/s"));
        assert!(job.total_size.is_some());
    }

    #[tokio::test]
    async fn cancellation_is_checked_before_every_event() {
        let (store, id, reporter) = setup(false);
        store.cancel_token(&id).unwrap().cancel();

        let err = reporter
            .on_progress(ProgressEvent::Downloading(DownloadTick::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::Cancelled));

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error.as_deref(), Some("Download cancelled by user."));
    }

    #[tokio::test]
    async fn error_event_sets_sentinel() {
        let (store, id, reporter) = setup(false);
        reporter
            .on_progress(ProgressEvent::Error {
                message: "HTTP Error 403".to_string(),
            })
            .await
            .unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(job.progress, FAILED_PROGRESS);
        assert!(job.error.unwrap().contains("HTTP Error 403"));
    }

    #[tokio::test]
    async fn finished_single_file_becomes_ready() {
        let (store, id, reporter) = setup(false);
        let dir = store.work_dir(&id).unwrap();
        std::fs::write(dir.path().join("Clip.mp4"), b"video").unwrap();

        reporter.on_progress(ProgressEvent::Finished).await.unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Ready);
        assert_eq!(job.progress, 100.0);
        assert_eq!(job.output_name.as_deref(), Some("Clip.mp4"));
        assert_eq!(job.output_path, Some(dir.path().join("Clip.mp4")));
    }

    #[tokio::test]
    async fn finalization_failure_is_recorded_not_raised() {
        let (store, id, reporter) = setup(true);

        reporter.on_progress(ProgressEvent::Finished).await.unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, JobStatus::Error);
        assert_eq!(
            job.error.as_deref(),
            Some("Post-processing error: no playlist directory was created")
        );
    }

    #[tokio::test]
    async fn item_started_resets_progress() {
        let (store, id, reporter) = setup(true);
        reporter
            .on_progress(ProgressEvent::Downloading(tick(Some(90), Some(100), None)))
            .await
            .unwrap();
        reporter
            .on_progress(ProgressEvent::ItemStarted {
                index: 2,
                count: Some(3),
            })
            .await
            .unwrap();

        let job = store.get(&id).unwrap();
        assert_eq!(job.progress, 0.0);
        assert_eq!(job.item.as_deref(), Some("2/3"));
    }
}
