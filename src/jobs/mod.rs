//! Background download jobs
//!
//! A job is created by [`runner::JobRunner::start`], tracked in a
//! [`store::JobStore`], fed by a [`reporter::ProgressReporter`] while the
//! extractor runs, and finally handed out once by the
//! [`retrieval::RetrievalCoordinator`]. Jobs nobody comes back for are
//! evicted by the [`reaper::Reaper`].

mod finalize;
pub mod models;
pub mod reaper;
pub mod reporter;
pub mod retrieval;
pub mod runner;
pub mod store;

use thiserror::Error;
use ulid::Ulid;

pub use finalize::FinalizeError;
pub use models::{FAILED_PROGRESS, Job, JobSnapshot, JobStatus};
pub use reaper::Reaper;
pub use retrieval::{Artifact, RetrievalCoordinator};
pub use runner::{JobRunner, RunnerConfig, StartRequest};
pub use store::{JobStore, MemoryJobStore};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Job {0} not found or file not ready")]
    NotFound(Ulid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
