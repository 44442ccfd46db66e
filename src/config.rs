//! Config module for ytdl-web

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

#[derive(Parser, Debug, Clone)]
pub struct ExtractorConfig {
    /// yt-dlp executable, looked up on PATH unless absolute
    #[clap(long, env = "YTW_YTDLP_PATH", default_value = "yt-dlp")]
    pub ytdlp_path: String,

    /// Root directory for per-job temporary directories
    #[clap(long, env = "YTW_WORK_DIR", default_value_t = get_default_work_dir())]
    pub work_dir: String,

    /// Abort downloads that run longer than this many seconds
    #[clap(long, env = "YTW_DOWNLOAD_TIMEOUT_SECS")]
    pub download_timeout_secs: Option<u64>,
}

/// Place job directories under the system temp directory
fn get_default_work_dir() -> String {
    std::env::temp_dir()
        .join("ytdl-web")
        .to_string_lossy()
        .into_owned()
}

impl ExtractorConfig {
    pub fn work_root(&self) -> PathBuf {
        self.work_dir.clone().into()
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.download_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct JobsConfig {
    /// Seconds to wait after a file was served before deleting it
    #[clap(long, env = "YTW_SERVE_GRACE_SECS", default_value = "5")]
    pub serve_grace_secs: u64,

    /// Finished jobs nobody fetched are evicted after this many seconds
    #[clap(long, env = "YTW_JOB_RETENTION_SECS", default_value = "3600")]
    pub job_retention_secs: u64,

    #[clap(long, env = "YTW_REAP_INTERVAL_SECS", default_value = "60")]
    pub reap_interval_secs: u64,
}

impl JobsConfig {
    pub fn serve_grace(&self) -> Duration {
        Duration::from_secs(self.serve_grace_secs)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn reap_interval(&self) -> Duration {
        // tokio intervals panic on a zero period
        Duration::from_secs(self.reap_interval_secs.max(1))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct Config {
    #[clap(long, env = "YTW_HOST", default_value = "0.0.0.0:5000")]
    pub host: String,

    #[clap(flatten)]
    pub extractor: ExtractorConfig,

    #[clap(flatten)]
    pub jobs: JobsConfig,
}

pub fn config() -> Config {
    Config::parse()
}
