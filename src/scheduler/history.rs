//! Bounded sync job history
//!
//! Jobs are kept in start order. Terminal jobs older than the retention
//! horizon are dropped, and the oldest terminal jobs go first when the
//! history exceeds its size limit. Pending and running jobs are never purged.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::models::SyncJob;

const MAX_RETENTION_HOURS: u64 = 24 * 365 * 100;

#[derive(Debug)]
pub struct JobHistory {
    jobs: VecDeque<SyncJob>,
    max_entries: usize,
    retention: Duration,
}

impl JobHistory {
    pub fn new(max_entries: usize, retention_hours: u64) -> Self {
        let hours = i64::try_from(retention_hours.min(MAX_RETENTION_HOURS)).unwrap_or(0);
        Self {
            jobs: VecDeque::new(),
            max_entries: max_entries.max(1),
            retention: Duration::hours(hours),
        }
    }

    /// Insert a job, or replace the entry with the same id.
    pub fn record(&mut self, job: &SyncJob, now: DateTime<Utc>) {
        match self.jobs.iter_mut().find(|j| j.job_id == job.job_id) {
            Some(existing) => *existing = job.clone(),
            None => self.jobs.push_back(job.clone()),
        }
        self.purge(now);
    }

    /// Up to `limit` jobs, newest first.
    pub fn recent(&self, limit: usize) -> Vec<SyncJob> {
        self.jobs.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn purge(&mut self, now: DateTime<Utc>) {
        if let Some(horizon) = now.checked_sub_signed(self.retention) {
            self.jobs.retain(|job| {
                !(job.is_terminal() && job.end_time.is_some_and(|end| end < horizon))
            });
        }

        while self.jobs.len() > self.max_entries {
            match self.jobs.iter().position(SyncJob::is_terminal) {
                Some(index) => {
                    self.jobs.remove(index);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncTrigger;

    fn finished(provider: &str, at: DateTime<Utc>) -> SyncJob {
        let mut job = SyncJob::pending(provider, SyncTrigger::Timer, at);
        job.mark_running();
        job.complete(at);
        job
    }

    #[test]
    fn newest_first_and_bounded() {
        let now = Utc::now();
        let mut history = JobHistory::new(2, 24);
        for provider in ["a", "b", "c"] {
            history.record(&finished(provider, now), now);
        }
        let recent: Vec<String> = history.recent(10).into_iter().map(|j| j.provider_id).collect();
        assert_eq!(recent, vec!["c", "b"]);
    }

    #[test]
    fn running_jobs_survive_the_size_limit() {
        let now = Utc::now();
        let mut history = JobHistory::new(1, 24);
        let mut running = SyncJob::pending("a", SyncTrigger::Manual, now);
        running.mark_running();
        history.record(&running, now);
        history.record(&finished("b", now), now);
        assert_eq!(history.len(), 1);
        assert_eq!(history.recent(1)[0].job_id, running.job_id);
    }

    #[test]
    fn expired_jobs_are_dropped() {
        let now = Utc::now();
        let mut history = JobHistory::new(10, 1);
        history.record(&finished("a", now - Duration::hours(3)), now);
        history.record(&finished("b", now), now);
        assert_eq!(history.len(), 1);
        assert!(!history.is_empty());
    }

    #[test]
    fn updates_replace_in_place() {
        let now = Utc::now();
        let mut history = JobHistory::new(10, 24);
        let mut job = SyncJob::pending("a", SyncTrigger::Manual, now);
        history.record(&job, now);
        job.mark_running();
        job.complete(now);
        history.record(&job, now);
        assert_eq!(history.len(), 1);
        assert!(history.recent(1)[0].is_terminal());
    }
}
