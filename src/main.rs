mod backend;
mod config;
mod extractor;
mod jobs;
mod util;

use std::sync::Arc;

use color_eyre::eyre::WrapErr;
use tracing_subscriber::EnvFilter;

use backend::{AppState, create_router};
use extractor::{Extractor, YtDlp};
use jobs::{JobRunner, JobStore, MemoryJobStore, Reaper, RetrievalCoordinator, RunnerConfig};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    color_eyre::install()?;

    let config = config::config();
    tracing::debug!(?config, "Loaded configuration");

    let work_root = config.extractor.work_root();
    std::fs::create_dir_all(&work_root)
        .wrap_err_with(|| format!("failed to create work directory {}", work_root.display()))?;
    tracing::info!("Job files are kept under {}", work_root.display());

    let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
    let extractor: Arc<dyn Extractor> = Arc::new(YtDlp::new(&config.extractor.ytdlp_path));
    let runner = JobRunner::new(
        store.clone(),
        extractor.clone(),
        RunnerConfig {
            work_root,
            download_timeout: config.extractor.download_timeout(),
        },
    );
    let retrieval = RetrievalCoordinator::new(store.clone(), config.jobs.serve_grace());

    let reaper = Reaper::new(
        store.clone(),
        config.jobs.job_retention(),
        config.jobs.reap_interval(),
    );
    tokio::spawn(reaper.run());

    let state = AppState::new(store, runner, retrieval, extractor)
        .wrap_err("failed to load page templates")?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.host)
        .await
        .wrap_err_with(|| format!("failed to bind {}", config.host))?;
    tracing::info!("Listening on: {}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
