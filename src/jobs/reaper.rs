//! Evicts finished jobs that nobody came back for.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use super::retrieval::cleanup_job;
use super::store::JobStore;

pub struct Reaper {
    store: Arc<dyn JobStore>,
    retention: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(store: Arc<dyn JobStore>, retention: Duration, interval: Duration) -> Self {
        Self {
            store,
            retention,
            interval,
        }
    }

    /// Removes every terminal, unclaimed job finished more than `retention`
    /// before `now`. Returns how many were removed.
    pub fn reap_once(&self, now: DateTime<Utc>) -> usize {
        let retention = TimeDelta::from_std(self.retention).unwrap_or(TimeDelta::MAX);
        let is_stale = |finished_at: Option<DateTime<Utc>>| {
            finished_at.is_some_and(|finished| now.signed_duration_since(finished) >= retention)
        };

        let candidates: Vec<_> = self
            .store
            .list()
            .into_iter()
            .filter(|job| job.status.is_terminal() && !job.claimed && is_stale(job.finished_at))
            .map(|job| job.id)
            .collect();

        let mut reaped = 0;
        for id in candidates {
            // Claiming first keeps a fetch from starting on a job being evicted
            let claimed = self
                .store
                .update(&id, |job| {
                    if job.claimed {
                        return false;
                    }
                    job.claimed = true;
                    true
                })
                .unwrap_or(false);
            if claimed && cleanup_job(&self.store, &id) {
                reaped += 1;
            }
        }
        reaped
    }

    pub async fn run(self) {
        info!(retention = ?self.retention, interval = ?self.interval, "Job reaper started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reaped = self.reap_once(Utc::now());
            let remaining = self.store.len();
            if reaped > 0 {
                info!(reaped, remaining, "Evicted stale jobs");
            } else {
                debug!(remaining, "No stale jobs");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::models::{Job, JobStatus};
    use crate::jobs::store::MemoryJobStore;
    use ulid::Ulid;

    fn insert(store: &Arc<dyn JobStore>, f: impl FnOnce(&mut Job)) -> Ulid {
        let mut job = Job::new("https://example.com/v", "best", false, tempfile::tempdir().unwrap());
        f(&mut job);
        store.insert(job)
    }

    #[test]
    fn evicts_only_stale_unclaimed_terminal_jobs() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let reaper = Reaper::new(store.clone(), Duration::from_secs(60), Duration::from_secs(1));

        let failed = insert(&store, |job| job.fail("boom"));
        let cancelled = insert(&store, Job::mark_cancelled);
        let running = insert(&store, |job| {
            job.set_status(JobStatus::Downloading);
        });
        let streaming = insert(&store, |job| {
            job.complete("/tmp/x.mp4".into(), "x.mp4".to_string());
            job.claimed = true;
        });
        let failed_dir = store.work_dir(&failed).unwrap();

        // nothing is old enough yet
        assert_eq!(reaper.reap_once(Utc::now()), 0);

        let later = Utc::now() + TimeDelta::seconds(61);
        assert_eq!(reaper.reap_once(later), 2);
        assert!(store.get(&failed).is_none());
        assert!(store.get(&cancelled).is_none());
        assert!(store.get(&running).is_some());
        assert!(store.get(&streaming).is_some());
        assert!(failed_dir.is_released());
    }

    #[test]
    fn never_fetched_ready_job_is_evicted() {
        let store: Arc<dyn JobStore> = Arc::new(MemoryJobStore::new());
        let reaper = Reaper::new(store.clone(), Duration::ZERO, Duration::from_secs(1));
        let ready = insert(&store, |job| {
            job.complete("/tmp/x.mp4".into(), "x.mp4".to_string())
        });

        assert_eq!(reaper.reap_once(Utc::now()), 1);
        assert!(store.get(&ready).is_none());
    }
}
