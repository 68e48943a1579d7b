//! Job store: the owner of every `JobRecord`.
//!
//! All status changes go through [`JobStore`] and are checked against the
//! job state machine, so a terminal record can never be overwritten.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::model::{JobId, JobListeners, JobRecord, JobStatus};

/// Aggregate counts over the records currently held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Storage for job records. Implementations must be safe to share between
/// workers, producers, and the cleanup loop.
pub trait JobStore: Send + Sync {
    /// Insert a fresh `queued` record.
    fn create(&self, id: JobId, listeners: JobListeners) -> Result<JobRecord>;

    /// Snapshot of the current record, if any.
    fn get(&self, id: &JobId) -> Option<JobRecord>;

    fn mark_running(&self, id: &JobId) -> Result<()>;

    fn mark_succeeded(&self, id: &JobId, result: serde_json::Value) -> Result<()>;

    fn mark_failed(&self, id: &JobId, error: &str) -> Result<()>;

    /// Evict expired terminal records. Returns how many were removed.
    fn cleanup_old_jobs(&self) -> Result<usize>;

    fn stats(&self) -> JobStats;
}

/// Process-local job store. Terminal records are kept for `retention` after
/// they finish, then dropped by [`cleanup_old_jobs`](JobStore::cleanup_old_jobs).
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
    retention: chrono::Duration,
}

impl MemoryJobStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, JobRecord>> {
        self.jobs.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a checked transition and let `update` fill in the outcome.
    fn transition(
        &self,
        id: &JobId,
        to: JobStatus,
        update: impl FnOnce(&mut JobRecord),
    ) -> Result<()> {
        let mut jobs = self.write();
        let record = jobs
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        if !record.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: record.status,
                to,
            });
        }

        let now = Utc::now();
        record.status = to;
        record.updated_at = now;
        if to.is_terminal() {
            record.finished_at = Some(now);
        }
        update(record);
        Ok(())
    }
}

impl JobStore for MemoryJobStore {
    fn create(&self, id: JobId, listeners: JobListeners) -> Result<JobRecord> {
        let mut jobs = self.write();
        if jobs.contains_key(&id) {
            return Err(Error::Other(format!("job already exists: {id}")));
        }
        let record = JobRecord::new(id.clone(), listeners);
        jobs.insert(id, record.clone());
        Ok(record)
    }

    fn get(&self, id: &JobId) -> Option<JobRecord> {
        self.read().get(id).cloned()
    }

    fn mark_running(&self, id: &JobId) -> Result<()> {
        self.transition(id, JobStatus::Running, |_| {})
    }

    fn mark_succeeded(&self, id: &JobId, result: serde_json::Value) -> Result<()> {
        self.transition(id, JobStatus::Succeeded, |record| {
            record.result = Some(result);
            record.error = None;
        })
    }

    fn mark_failed(&self, id: &JobId, error: &str) -> Result<()> {
        self.transition(id, JobStatus::Failed, |record| {
            record.result = None;
            record.error = Some(error.to_string());
        })
    }

    fn cleanup_old_jobs(&self) -> Result<usize> {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.retention) else {
            return Ok(0);
        };
        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, record| match record.finished_at {
            Some(finished) => finished > cutoff,
            None => true,
        });
        Ok(before - jobs.len())
    }

    fn stats(&self) -> JobStats {
        let jobs = self.read();
        let mut stats = JobStats {
            total: jobs.len(),
            ..Default::default()
        };
        for record in jobs.values() {
            match record.status {
                JobStatus::Queued => stats.queued += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Succeeded => stats.succeeded += 1,
                JobStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}
