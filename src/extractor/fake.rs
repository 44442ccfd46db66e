//! Scripted extractor for tests
//!
//! Plays back a fixed list of steps instead of running yt-dlp: progress
//! events, files written into the destination, and a point where it parks
//! until the job is cancelled.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::{DownloadOptions, Extractor, ExtractorError, MediaInfo, ProgressEvent, ProgressSink};
use crate::jobs::{JobStatus, JobStore};

#[derive(Debug, Clone)]
pub enum FakeStep {
    Event(ProgressEvent),
    /// Writes a file relative to the destination, creating parent directories
    Write(PathBuf, Vec<u8>),
    /// Parks until the cancellation token fires
    WaitForCancel,
}

/// How the download ends once every step has played
#[derive(Debug, Clone, Default)]
pub enum FakeOutcome {
    /// Emit `Finished` and succeed
    #[default]
    Finish,
    /// Emit an `Error` event, then fail
    Fail(String),
    /// Fail without emitting anything
    SilentFail(String),
    /// Succeed without emitting `Finished`
    Return,
    Panic,
}

#[derive(Default)]
struct Inner {
    steps: Vec<FakeStep>,
    outcome: FakeOutcome,
    analysis: Option<MediaInfo>,
    calls: Mutex<Vec<DownloadOptions>>,
    observed: Mutex<Vec<(JobStatus, f64)>>,
    observer: Mutex<Option<Arc<dyn JobStore>>>,
    parked: Notify,
}

#[derive(Clone, Default)]
pub struct FakeExtractor {
    inner: Arc<Inner>,
}

impl FakeExtractor {
    pub fn new(steps: Vec<FakeStep>) -> Self {
        Self {
            inner: Arc::new(Inner {
                steps,
                ..Default::default()
            }),
        }
    }

    fn rebuild(self, f: impl FnOnce(&mut Inner)) -> Self {
        let mut inner =
            Arc::try_unwrap(self.inner).unwrap_or_else(|_| panic!("configure the fake before cloning it"));
        f(&mut inner);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn with_outcome(self, outcome: FakeOutcome) -> Self {
        self.rebuild(|inner| inner.outcome = outcome)
    }

    pub fn with_analysis(self, info: MediaInfo) -> Self {
        self.rebuild(|inner| inner.analysis = Some(info))
    }

    /// Records the job's status and progress after every tick. Assumes the
    /// store holds a single job.
    pub fn observe(&self, store: Arc<dyn JobStore>) {
        *self.inner.observer.lock().unwrap() = Some(store);
    }

    pub fn calls(&self) -> Vec<DownloadOptions> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn observed_statuses(&self) -> Vec<JobStatus> {
        self.inner
            .observed
            .lock()
            .unwrap()
            .iter()
            .map(|(status, _)| *status)
            .collect()
    }

    pub fn observed_progress(&self) -> Vec<f64> {
        self.inner
            .observed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, progress)| *progress)
            .collect()
    }

    /// Resolves once the download reached a [`FakeStep::WaitForCancel`]
    pub async fn wait_until_parked(&self) {
        self.inner.parked.notified().await;
    }

    fn record(&self) {
        let store = self.inner.observer.lock().unwrap().clone();
        if let Some(job) = store.and_then(|store| store.list().into_iter().next()) {
            self.inner
                .observed
                .lock()
                .unwrap()
                .push((job.status, job.progress));
        }
    }
}

#[async_trait]
impl Extractor for FakeExtractor {
    async fn analyze(&self, url: &str) -> Result<MediaInfo, ExtractorError> {
        self.inner
            .analysis
            .clone()
            .ok_or_else(|| ExtractorError::Failed(format!("Unsupported URL: {url}")))
    }

    async fn download(
        &self,
        _url: &str,
        dest: &Path,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractorError> {
        self.inner.calls.lock().unwrap().push(options.clone());

        for step in &self.inner.steps {
            match step {
                FakeStep::Event(event) => {
                    sink.on_progress(event.clone()).await?;
                    if matches!(event, ProgressEvent::Downloading(_)) {
                        self.record();
                    }
                }
                FakeStep::Write(path, contents) => {
                    let path = dest.join(path);
                    if let Some(parent) = path.parent() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                    tokio::fs::write(path, contents).await?;
                }
                FakeStep::WaitForCancel => {
                    self.inner.parked.notify_one();
                    cancel.cancelled().await;
                }
            }
        }

        match &self.inner.outcome {
            FakeOutcome::Finish => sink.on_progress(ProgressEvent::Finished).await,
            FakeOutcome::Fail(message) => {
                sink.on_progress(ProgressEvent::Error {
                    message: message.clone(),
                })
                .await?;
                Err(ExtractorError::Failed(message.clone()))
            }
            FakeOutcome::SilentFail(message) => Err(ExtractorError::Failed(message.clone())),
            FakeOutcome::Return => Ok(()),
            FakeOutcome::Panic => panic!("scripted extractor panic"),
        }
    }
}
