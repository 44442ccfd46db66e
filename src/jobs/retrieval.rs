//! Retrieval and cleanup
//!
//! A ready job's artifact is handed out exactly once. Whoever streams it holds
//! a [`CleanupGuard`]; dropping the guard (transfer done or client gone)
//! schedules removal of the job's files and store entry after a grace delay.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use ulid::Ulid;

use super::JobError;
use super::models::JobStatus;
use super::store::JobStore;

/// Removes a job from the store and deletes its work directory.
///
/// Returns false if the job was already gone.
pub(crate) fn cleanup_job(store: &Arc<dyn JobStore>, id: &Ulid) -> bool {
    let Some(job) = store.remove(id) else {
        debug!(id = %id, "Nothing to clean up");
        return false;
    };
    match job.work_dir.release() {
        Ok(true) => debug!(id = %id, path = ?job.work_dir.path(), "Work directory removed"),
        Ok(false) => {}
        Err(e) => warn!(id = %id, error = %e, "Failed to remove work directory"),
    }
    info!(id = %id, status = %job.status, "Job cleaned up");
    true
}

pub fn content_type_for(name: &str) -> &'static str {
    let is_zip = Path::new(name)
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("zip"));
    if is_zip {
        "application/zip"
    } else {
        "application/octet-stream"
    }
}

/// Schedules cleanup of a job when dropped
pub struct CleanupGuard {
    id: Ulid,
    coordinator: RetrievalCoordinator,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let id = self.id;
        let coordinator = self.coordinator.clone();
        let grace = coordinator.grace;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(id = %id, ?grace, "Transfer ended, cleanup scheduled");
                handle.spawn(async move {
                    tokio::time::sleep(grace).await;
                    coordinator.cleanup(&id);
                });
            }
            Err(_) => {
                coordinator.cleanup(&id);
            }
        }
    }
}

/// An opened artifact, ready to be streamed
pub struct Artifact {
    pub file: tokio::fs::File,
    pub name: String,
    pub content_type: &'static str,
    pub len: u64,
    pub cleanup: CleanupGuard,
}

#[derive(Clone)]
pub struct RetrievalCoordinator {
    store: Arc<dyn JobStore>,
    grace: Duration,
}

impl RetrievalCoordinator {
    pub fn new(store: Arc<dyn JobStore>, grace: Duration) -> Self {
        Self { store, grace }
    }

    /// Claims a ready job and opens its artifact.
    ///
    /// Fails with [`JobError::NotFound`] unless the job is ready, has an
    /// output and nobody fetched it before.
    pub async fn fetch(&self, id: &Ulid) -> Result<Artifact, JobError> {
        let claimed = self
            .store
            .update(id, |job| {
                if job.status != JobStatus::Ready || job.claimed {
                    return None;
                }
                let output = job.output_path.clone().zip(job.output_name.clone())?;
                job.claimed = true;
                Some(output)
            })
            .flatten();
        let Some((path, name)) = claimed else {
            debug!(id = %id, "Fetch of a job that is not ready");
            return Err(JobError::NotFound(*id));
        };

        // From here on the job is spoken for; any exit cleans it up
        let cleanup = CleanupGuard {
            id: *id,
            coordinator: self.clone(),
        };

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(id = %id, path = ?path, error = %e, "Artifact vanished before it was served");
                return Err(JobError::NotFound(*id));
            }
        };
        let len = file.metadata().await?.len();

        info!(id = %id, name = %name, bytes = len, "Serving artifact");
        Ok(Artifact {
            file,
            content_type: content_type_for(&name),
            name,
            len,
            cleanup,
        })
    }

    /// Releases a job's storage and store entry. A second call is a no-op.
    pub fn cleanup(&self, id: &Ulid) -> bool {
        cleanup_job(&self.store, id)
    }
}
