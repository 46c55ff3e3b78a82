use thiserror::Error;

use crate::types::{JobId, JobStatus};

/// Errors surfaced synchronously by the job core. None of them mutate state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Too many active jobs ({limit} max)")]
    Capacity { limit: usize },

    #[error("Job {id} is {current}; cannot move to {requested}")]
    Conflict {
        id: JobId,
        current: JobStatus,
        requested: JobStatus,
    },

    #[error("Job {id} is {status}; its log is closed")]
    Finished { id: JobId, status: JobStatus },

    #[error("Runner is shutting down")]
    ShuttingDown,
}

/// A single subscriber could not be reached. Local to the publish call.
#[derive(Debug, Error)]
#[error("subscriber {subscriber} of job {job_id} is gone")]
pub struct DeliveryError {
    pub job_id: JobId,
    pub subscriber: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display() {
        let id = Uuid::nil();
        assert_eq!(
            JobError::NotFound(id).to_string(),
            "Job not found: 00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            JobError::Capacity { limit: 3 }.to_string(),
            "Too many active jobs (3 max)"
        );
        let conflict = JobError::Conflict {
            id,
            current: JobStatus::Completed,
            requested: JobStatus::Running,
        };
        assert!(conflict.to_string().contains("is completed; cannot move to running"));
        let finished = JobError::Finished {
            id,
            status: JobStatus::Error,
        };
        assert!(finished.to_string().ends_with("is error; its log is closed"));
    }
}
