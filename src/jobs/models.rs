//! Data structures for download jobs
//!
//! A [`Job`] lives inside the job store for as long as it is tracked. Readers
//! never see it directly; they get a [`JobSnapshot`] instead.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use ulid::Ulid;

/// Progress value reported for failed or cancelled jobs
pub const FAILED_PROGRESS: f64 = -1.0;

/// Status of a job, see the state machine in the runner
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created, background task not running yet
    #[default]
    Pending,
    /// Building extractor options
    Configuring,
    /// Extractor is transferring media
    Downloading,
    /// Building the deliverable (archive or single file)
    Finalizing,
    /// Artifact ready to be fetched
    Ready,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Error | Self::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Waiting..."),
            Self::Configuring => write!(f, "Configuring yt-dlp..."),
            Self::Downloading => write!(f, "Downloading..."),
            Self::Finalizing => write!(f, "Post-processing..."),
            Self::Ready => write!(f, "Ready"),
            Self::Error => write!(f, "Error"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Private temporary directory of a job.
///
/// Shared between the job's task and whoever cleans up after it; the directory
/// is removed at most once, by whichever side calls [`WorkDir::release`] first.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    dir: Mutex<Option<TempDir>>,
}

impl WorkDir {
    pub fn new(dir: TempDir) -> Self {
        Self {
            path: dir.path().to_path_buf(),
            dir: Mutex::new(Some(dir)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn is_released(&self) -> bool {
        self.dir
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Deletes the directory. Returns `Ok(false)` if it was already released.
    pub fn release(&self) -> io::Result<bool> {
        let dir = self
            .dir
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        match dir {
            Some(dir) => dir.close().map(|_| true),
            None => Ok(false),
        }
    }
}

/// One tracked download
#[derive(Debug)]
pub struct Job {
    pub id: Ulid,
    pub url: String,
    pub status: JobStatus,
    /// Percentage in `[0, 100]`, or [`FAILED_PROGRESS`]
    pub progress: f64,
    pub is_playlist: bool,
    pub format_selector: String,
    pub error: Option<String>,
    pub cancel: CancellationToken,
    pub work_dir: Arc<WorkDir>,
    pub output_path: Option<PathBuf>,
    pub output_name: Option<String>,
    pub speed: Option<String>,
    pub total_size: Option<String>,
    /// Position in the playlist, e.g. `2/3`
    pub item: Option<String>,
    /// Set once a fetch has started streaming the artifact
    pub claimed: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(
        url: impl Into<String>,
        format_selector: impl Into<String>,
        is_playlist: bool,
        work_dir: TempDir,
    ) -> Self {
        Self {
            id: Ulid::new(),
            url: url.into(),
            status: JobStatus::Pending,
            progress: 0.0,
            is_playlist,
            format_selector: format_selector.into(),
            error: None,
            cancel: CancellationToken::new(),
            work_dir: Arc::new(WorkDir::new(work_dir)),
            output_path: None,
            output_name: None,
            speed: None,
            total_size: None,
            item: None,
            claimed: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves to `status` unless the job already reached a terminal state.
    /// Returns whether the transition happened.
    pub fn set_status(&mut self, status: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = status;
        if status.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.set_status(JobStatus::Error) {
            self.progress = FAILED_PROGRESS;
            self.error = Some(message.into());
        }
    }

    pub fn mark_cancelled(&mut self) {
        if self.set_status(JobStatus::Cancelled) {
            self.progress = FAILED_PROGRESS;
            self.error = Some("Download cancelled by user.".to_string());
        }
    }

    pub fn complete(&mut self, output_path: PathBuf, output_name: String) {
        if self.output_path.is_some() {
            return;
        }
        if self.set_status(JobStatus::Ready) {
            self.progress = 100.0;
            self.output_path = Some(output_path);
            self.output_name = Some(output_name);
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id,
            url: self.url.clone(),
            status: self.status,
            progress: self.progress,
            is_playlist: self.is_playlist,
            format_selector: self.format_selector.clone(),
            error: self.error.clone(),
            cancel_requested: self.cancel.is_cancelled(),
            output_path: self.output_path.clone(),
            output_name: self.output_name.clone(),
            speed: self.speed.clone(),
            total_size: self.total_size.clone(),
            item: self.item.clone(),
            claimed: self.claimed,
            created_at: self.created_at,
            finished_at: self.finished_at,
        }
    }
}

/// Point-in-time copy of a job's observable state
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub id: Ulid,
    pub url: String,
    pub status: JobStatus,
    pub progress: f64,
    pub is_playlist: bool,
    pub format_selector: String,
    pub error: Option<String>,
    pub cancel_requested: bool,
    #[serde(skip)]
    pub output_path: Option<PathBuf>,
    pub output_name: Option<String>,
    pub speed: Option<String>,
    pub total_size: Option<String>,
    pub item: Option<String>,
    #[serde(skip)]
    pub claimed: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}
