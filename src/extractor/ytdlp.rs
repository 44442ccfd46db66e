//! `yt-dlp` subprocess backend
//!
//! Metadata comes from `yt-dlp -J`. Downloads run with a custom
//! `--progress-template` so that every progress line on stdout is a
//! machine-readable record; playlist entries announce themselves through
//! `--print before_dl:...`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::{
    DownloadOptions, DownloadTick, Extractor, ExtractorError, MediaInfo, ProgressEvent,
    ProgressSink, RawInfo,
};

const PROGRESS_PREFIX: &str = "YTW_PROGRESS|";
const ITEM_PREFIX: &str = "YTW_ITEM|";

const PROGRESS_TEMPLATE: &str = "download:YTW_PROGRESS|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress.speed)s|%(progress.fragment_index)s|%(progress.fragment_count)s";
const ITEM_TEMPLATE: &str = "before_dl:YTW_ITEM|%(playlist_index)s|%(n_entries)s";

pub struct YtDlp {
    binary: PathBuf,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new("yt-dlp")
    }
}

impl YtDlp {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .env("PYTHONIOENCODING", "UTF-8")
            .env("PYTHONUTF8", "1")
            .stdin(Stdio::null())
            .kill_on_drop(true);
        command
    }

    fn download_command(&self, url: &str, dest: &Path, options: &DownloadOptions) -> Command {
        let mut command = self.command();
        command
            .arg("--newline")
            .arg("--progress")
            .arg("--no-simulate")
            .arg("--no-warnings")
            .arg("--progress-template")
            .arg(PROGRESS_TEMPLATE)
            .arg("--print")
            .arg(ITEM_TEMPLATE)
            .arg("-f")
            .arg(&options.format)
            .arg("--merge-output-format")
            .arg(&options.merge_output_format)
            .arg("-P")
            .arg(dest)
            .arg("-o")
            .arg(&options.output_template);

        if options.playlist {
            command.arg("--yes-playlist");
        } else {
            command.arg("--no-playlist");
        }
        if options.ignore_errors {
            command.arg("--ignore-errors");
        }

        command
            .arg("--")
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "yt-dlp already exited");
    }
}

#[async_trait]
impl Extractor for YtDlp {
    #[instrument(level = "debug", skip(self))]
    async fn analyze(&self, url: &str) -> Result<MediaInfo, ExtractorError> {
        let output = self
            .command()
            .arg("-J")
            .arg("--no-warnings")
            .arg("--playlist-items")
            .arg("1:1")
            .arg("--")
            .arg(url)
            .output()
            .await
            .map_err(ExtractorError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = last_line(&stderr).unwrap_or("yt-dlp failed.").to_string();
            warn!(status = %output.status, message = %message, "Analysis failed");
            return Err(ExtractorError::Failed(message));
        }

        let raw: RawInfo = serde_json::from_slice(&output.stdout)?;
        Ok(MediaInfo::from_raw(url, raw))
    }

    #[instrument(name = "ytdlp_download", level = "debug", skip_all, fields(url = %url))]
    async fn download(
        &self,
        url: &str,
        dest: &Path,
        options: &DownloadOptions,
        sink: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractorError> {
        let mut child = self
            .download_command(url, dest, options)
            .spawn()
            .map_err(ExtractorError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractorError::Failed("yt-dlp stdout not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractorError::Failed("yt-dlp stderr not captured".to_string()))?;

        // Keep the last stderr line around as the failure message
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            let mut last = None;
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if !line.is_empty() {
                    trace!(line, "yt-dlp stderr");
                    last = Some(line.to_string());
                }
            }
            last
        });

        let mut lines = BufReader::new(stdout).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cancellation requested, stopping yt-dlp");
                    kill(&mut child).await;
                    return Err(ExtractorError::Cancelled);
                }
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };

            let Some(event) = parse_line(&line) else {
                trace!(line = %line, "yt-dlp stdout");
                continue;
            };
            if let Err(e) = sink.on_progress(event).await {
                kill(&mut child).await;
                return Err(e);
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => None,
            status = child.wait() => Some(status?),
        };
        let Some(status) = status else {
            kill(&mut child).await;
            return Err(ExtractorError::Cancelled);
        };
        let stderr_tail = stderr_task.await.ok().flatten();

        // With --ignore-errors yt-dlp exits non-zero when some entries failed;
        // whatever did download still gets finalized. Nothing on disk means
        // the whole run failed.
        let tolerated = !status.success()
            && options.ignore_errors
            && status.code().is_some()
            && has_output(dest).await;
        if status.success() || tolerated {
            if !status.success() {
                warn!(status = %status, error = ?stderr_tail, "Some playlist entries failed");
            }
            sink.on_progress(ProgressEvent::Finished).await?;
            return Ok(());
        }

        let message = stderr_tail.unwrap_or_else(|| format!("yt-dlp exited with {status}"));
        sink.on_progress(ProgressEvent::Error {
            message: message.clone(),
        })
        .await?;
        Err(ExtractorError::Failed(message))
    }
}

async fn has_output(dest: &Path) -> bool {
    match tokio::fs::read_dir(dest).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}

/// yt-dlp prints `NA` for missing fields; numbers may come out as floats
fn parse_number(field: Option<&str>) -> Option<f64> {
    field
        .map(str::trim)
        .filter(|f| !f.is_empty() && *f != "NA" && *f != "None")
        .and_then(|f| f.parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n >= 0.0)
}

/// Parses one stdout line into a progress event, if it is one of ours
pub(crate) fn parse_line(line: &str) -> Option<ProgressEvent> {
    let line = line.trim();

    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        let mut fields = rest.split('|');
        let downloaded_bytes = parse_number(fields.next()).map(|n| n as u64);
        let total_bytes = parse_number(fields.next()).map(|n| n as u64);
        let total_bytes_estimate = parse_number(fields.next()).map(|n| n as u64);
        let speed = parse_number(fields.next());
        let fragment_index = parse_number(fields.next());
        let fragment_count = parse_number(fields.next());

        let fraction = match (fragment_index, fragment_count) {
            (Some(index), Some(count)) if count > 0.0 => Some(index / count),
            _ => None,
        };

        return Some(ProgressEvent::Downloading(DownloadTick {
            downloaded_bytes,
            total_bytes,
            total_bytes_estimate,
            fraction,
            speed,
        }));
    }

    if let Some(rest) = line.strip_prefix(ITEM_PREFIX) {
        let mut fields = rest.split('|');
        let index = parse_number(fields.next()).map(|n| n as u32)?;
        let count = parse_number(fields.next()).map(|n| n as u32);
        return Some(ProgressEvent::ItemStarted { index, count });
    }

    None
}
