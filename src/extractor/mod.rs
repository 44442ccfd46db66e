//! Media extractor backends
//!
//! An extractor inspects a URL (title, formats, playlist or not) and performs
//! the actual download into a directory, reporting progress to a
//! [`ProgressSink`] as it goes. The only production backend drives the
//! `yt-dlp` executable.

#[cfg(test)]
pub mod fake;
mod info;
mod ytdlp;

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

pub use info::{BEST_FORMAT, FormatOption, MediaInfo, PlaylistSummary, RawFormat, RawInfo, VideoSummary};
pub use ytdlp::YtDlp;

#[derive(Debug, thiserror::Error)]
pub enum ExtractorError {
    /// The download was stopped on request. Never retried.
    #[error("download cancelled")]
    Cancelled,

    #[error("download timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("failed to start extractor: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),

    #[error("could not parse extractor output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One raw progress sample for the item currently being transferred
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadTick {
    pub downloaded_bytes: Option<u64>,
    pub total_bytes: Option<u64>,
    pub total_bytes_estimate: Option<u64>,
    /// Completed fraction in `[0, 1]` when byte counts are not available
    /// (fragmented streams)
    pub fraction: Option<f64>,
    /// Bytes per second
    pub speed: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// A playlist entry is about to be downloaded (1-based index)
    ItemStarted { index: u32, count: Option<u32> },
    Downloading(DownloadTick),
    /// All media has been transferred; the output is ready for finalization
    Finished,
    /// The extractor gave up
    Error { message: String },
}

/// Receives progress events during a download.
///
/// Returning an error aborts the download: the extractor must stop
/// immediately and hand the error back to its caller.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_progress(&self, event: ProgressEvent) -> Result<(), ExtractorError>;
}

/// Options for a single download, built by the job runner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// yt-dlp format selector expression
    pub format: String,
    /// Output template relative to the destination directory
    pub output_template: String,
    pub merge_output_format: String,
    pub playlist: bool,
    /// Keep going when a playlist entry fails
    pub ignore_errors: bool,
}

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Inspect a URL without downloading anything
    async fn analyze(&self, url: &str) -> Result<MediaInfo, ExtractorError>;

    /// Download `url` into `dest`, reporting to `sink`.
    ///
    /// Must return [`ExtractorError::Cancelled`] promptly once `cancel` fires
    /// or the sink rejects an event.
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractorError>;
}
