//! Job store
//!
//! The only shared mutable state of the service. Handlers, job tasks, the
//! retrieval coordinator and the reaper all receive it as `Arc<dyn JobStore>`.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tokio_util::sync::CancellationToken;
use tracing::trace;
use ulid::Ulid;

use super::models::{Job, JobSnapshot, WorkDir};

pub trait JobStore: Send + Sync {
    /// Stores a new job and returns its id, which is unique among live jobs
    fn insert(&self, job: Job) -> Ulid;

    fn get(&self, id: &Ulid) -> Option<JobSnapshot>;

    /// Applies `f` to the job atomically. Returns false if the job is unknown.
    fn mutate(&self, id: &Ulid, f: &mut dyn FnMut(&mut Job)) -> bool;

    fn remove(&self, id: &Ulid) -> Option<Job>;

    fn cancel_token(&self, id: &Ulid) -> Option<CancellationToken>;

    fn work_dir(&self, id: &Ulid) -> Option<Arc<WorkDir>>;

    fn list(&self) -> Vec<JobSnapshot>;

    fn len(&self) -> usize;

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl dyn JobStore {
    /// Like [`JobStore::mutate`] but hands back the closure's result
    pub fn update<R>(&self, id: &Ulid, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        let mut f = Some(f);
        let mut out = None;
        self.mutate(id, &mut |job: &mut Job| {
            if let Some(f) = f.take() {
                out = Some(f(job));
            }
        });
        out
    }
}

/// In-memory store, lost on restart
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Ulid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    // Poisoned locks are recovered, the map itself is never left half-updated
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Ulid, Job>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Ulid, Job>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, mut job: Job) -> Ulid {
        let mut jobs = self.write();
        while jobs.contains_key(&job.id) {
            job.id = Ulid::new();
        }
        let id = job.id;
        jobs.insert(id, job);
        trace!(id = %id, "Job stored");
        id
    }

    fn get(&self, id: &Ulid) -> Option<JobSnapshot> {
        self.read().get(id).map(Job::snapshot)
    }

    fn mutate(&self, id: &Ulid, f: &mut dyn FnMut(&mut Job)) -> bool {
        match self.write().get_mut(id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: &Ulid) -> Option<Job> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            trace!(id = %id, "Job removed from store");
        }
        removed
    }

    fn cancel_token(&self, id: &Ulid) -> Option<CancellationToken> {
        self.read().get(id).map(|job| job.cancel.clone())
    }

    fn work_dir(&self, id: &Ulid) -> Option<Arc<WorkDir>> {
        self.read().get(id).map(|job| job.work_dir.clone())
    }

    fn list(&self) -> Vec<JobSnapshot> {
        let mut jobs: Vec<JobSnapshot> = self.read().values().map(Job::snapshot).collect();
        jobs.sort_by_key(|job| job.id);
        jobs
    }

    fn len(&self) -> usize {
        self.read().len()
    }
}
