//! In-memory job registry with admission control.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use metrics::{counter, gauge};
use serde_json::Value;

use crate::error::JobError;
use crate::types::{Job, JobId, JobUpdate};

struct StoreInner {
    jobs: HashMap<JobId, Job>,
    /// Jobs in `pending` or `running`. Kept in step with every transition.
    active: usize,
}

/// Owns every job record for the lifetime of the process.
///
/// All reads and writes go through one `std::sync::Mutex`. The lock is never
/// held across an `.await`, so a blocking mutex is cheaper than an async one
/// and a timeout racing a completion can never interleave two writes.
pub struct JobStore {
    inner: Mutex<StoreInner>,
    max_active: usize,
}

impl JobStore {
    /// Create an empty store admitting at most `max_active` unfinished jobs.
    pub fn new(max_active: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                jobs: HashMap::new(),
                active: 0,
            }),
            max_active,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::error!("job store mutex poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }

    /// Allocate a new `pending` job, or refuse when the active limit is reached.
    pub fn create(&self, kind: impl Into<String>, input: Value) -> Result<Job, JobError> {
        let kind = kind.into();
        let mut inner = self.lock();
        if inner.active >= self.max_active {
            counter!("jobs_rejected_total", "reason" => "capacity").increment(1);
            tracing::warn!(
                kind = %kind,
                active = inner.active,
                limit = self.max_active,
                "job rejected: capacity reached"
            );
            return Err(JobError::Capacity {
                limit: self.max_active,
            });
        }

        let job = Job::new(kind, input);
        inner.active += 1;
        inner.jobs.insert(job.id(), job.clone());
        gauge!("jobs_active").set(inner.active as f64);
        counter!("jobs_created_total", "kind" => job.kind().to_string()).increment(1);
        tracing::info!(job_id = %job.id(), kind = %job.kind(), "job created");
        Ok(job)
    }

    pub fn get(&self, id: JobId) -> Result<Job, JobError> {
        self.lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(JobError::NotFound(id))
    }

    /// Apply one lifecycle change atomically and return the new record.
    ///
    /// An illegal transition leaves the record untouched.
    pub fn update(&self, id: JobId, update: JobUpdate) -> Result<Job, JobError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        let was_active = job.status().is_active();
        job.apply(update).map_err(|requested| JobError::Conflict {
            id,
            current: job.status(),
            requested,
        })?;
        let job = job.clone();
        if was_active && job.is_terminal() {
            inner.active = inner.active.saturating_sub(1);
            gauge!("jobs_active").set(inner.active as f64);
        }
        tracing::debug!(job_id = %id, status = %job.status(), revision = job.revision(), "job updated");
        Ok(job)
    }

    /// Append one progress line to the job log.
    ///
    /// Terminal records are immutable, so a finished job refuses new lines.
    pub fn append_log(&self, id: JobId, message: impl Into<String>) -> Result<Job, JobError> {
        let mut inner = self.lock();
        let job = inner.jobs.get_mut(&id).ok_or(JobError::NotFound(id))?;
        if job.is_terminal() {
            return Err(JobError::Finished {
                id,
                status: job.status(),
            });
        }
        job.push_log(message.into());
        Ok(job.clone())
    }

    /// All jobs, newest first.
    pub fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.lock().jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        jobs
    }

    pub fn active_count(&self) -> usize {
        self.lock().active
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn len(&self) -> usize {
        self.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
