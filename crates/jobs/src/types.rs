//! Types for the job lifecycle tracker.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Unique identifier for a job.
pub type JobId = Uuid;

/// Coarse lifecycle status of a job.
///
/// Transitions only move forward: `Pending -> Running -> Completed | Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
        }
    }

    /// `Completed` and `Error` are terminal; nothing moves a job out of them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Error)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "error" => Ok(JobStatus::Error),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Lifecycle phase of a job, carrying only the fields valid in that phase.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPhase {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Completed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        result: Value,
    },
    Failed {
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
        error: String,
    },
}

impl JobPhase {
    pub fn status(&self) -> JobStatus {
        match self {
            JobPhase::Pending => JobStatus::Pending,
            JobPhase::Running { .. } => JobStatus::Running,
            JobPhase::Completed { .. } => JobStatus::Completed,
            JobPhase::Failed { .. } => JobStatus::Error,
        }
    }
}

/// One tracked unit of asynchronous work.
///
/// Records are only mutated through [`crate::JobStore`]; callers always get
/// an owned copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: JobId,
    kind: String,
    input: Value,
    created_at: DateTime<Utc>,
    phase: JobPhase,
    log: Vec<String>,
    revision: u64,
}

impl Job {
    pub(crate) fn new(kind: String, input: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            input,
            created_at: Utc::now(),
            phase: JobPhase::Pending,
            log: Vec::new(),
            revision: 0,
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Name of the workflow that executes this job.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn phase(&self) -> &JobPhase {
        &self.phase
    }

    pub fn status(&self) -> JobStatus {
        self.phase.status()
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match &self.phase {
            JobPhase::Pending => None,
            JobPhase::Running { started_at }
            | JobPhase::Completed { started_at, .. }
            | JobPhase::Failed { started_at, .. } => Some(*started_at),
        }
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match &self.phase {
            JobPhase::Completed { completed_at, .. } | JobPhase::Failed { completed_at, .. } => {
                Some(*completed_at)
            }
            _ => None,
        }
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.phase {
            JobPhase::Completed { result, .. } => Some(result),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.phase {
            JobPhase::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot::from(self)
    }

    /// Apply a lifecycle change. Returns the status the change targets on
    /// rejection so the caller can report the conflict.
    pub(crate) fn apply(&mut self, update: JobUpdate) -> Result<(), JobStatus> {
        let now = Utc::now();
        let next = match (&self.phase, update) {
            (JobPhase::Pending, JobUpdate::Start { input }) => {
                if let Some(input) = input {
                    self.input = input;
                }
                JobPhase::Running { started_at: now }
            }
            (JobPhase::Running { started_at }, JobUpdate::Complete { result }) => {
                JobPhase::Completed {
                    started_at: *started_at,
                    completed_at: now,
                    result,
                }
            }
            (JobPhase::Running { started_at }, JobUpdate::Fail { error }) => JobPhase::Failed {
                started_at: *started_at,
                completed_at: now,
                error,
            },
            (_, update) => return Err(update.target()),
        };
        self.phase = next;
        self.revision += 1;
        Ok(())
    }

    pub(crate) fn push_log(&mut self, message: String) {
        self.log.push(message);
        self.revision += 1;
    }
}

/// A lifecycle change applied atomically by [`crate::JobStore::update`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    /// `pending -> running`; optionally replaces the stored input.
    Start { input: Option<Value> },
    /// `running -> completed`.
    Complete { result: Value },
    /// `running -> error`. The message should already be sanitized.
    Fail { error: String },
}

impl JobUpdate {
    pub fn target(&self) -> JobStatus {
        match self {
            JobUpdate::Start { .. } => JobStatus::Running,
            JobUpdate::Complete { .. } => JobStatus::Completed,
            JobUpdate::Fail { .. } => JobStatus::Error,
        }
    }
}

/// Serializable view of a [`Job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub kind: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub log: Vec<String>,
    pub revision: u64,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            kind: job.kind.clone(),
            status: job.status(),
            created_at: job.created_at,
            started_at: job.started_at(),
            completed_at: job.completed_at(),
            input: job.input.clone(),
            result: job.result().cloned(),
            error: job.error().map(str::to_owned),
            log: job.log.clone(),
            revision: job.revision,
        }
    }
}

/// Progress event pushed to subscribers.
///
/// `seq` is the job revision the event reflects; a subscriber whose replay
/// already covered that revision skips it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Log { message: String },
    Status { job: JobSnapshot },
    Error { message: String },
}

impl JobEvent {
    fn at(job: &Job, kind: EventKind) -> Self {
        Self {
            job_id: job.id,
            seq: job.revision,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn log(job: &Job, message: impl Into<String>) -> Self {
        Self::at(
            job,
            EventKind::Log {
                message: message.into(),
            },
        )
    }

    pub fn status(job: &Job) -> Self {
        Self::at(job, EventKind::Status { job: job.snapshot() })
    }

    pub fn error(job: &Job, message: impl Into<String>) -> Self {
        Self::at(
            job,
            EventKind::Error {
                message: message.into(),
            },
        )
    }

    /// The `type` tag this event serializes with.
    pub fn event_type(&self) -> &'static str {
        match self.kind {
            EventKind::Log { .. } => "log",
            EventKind::Status { .. } => "status",
            EventKind::Error { .. } => "error",
        }
    }

    /// Whether this event reports a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(&self.kind, EventKind::Status { job } if job.status.is_terminal())
    }

    /// Everything a late subscriber needs to catch up: the current status
    /// followed by the stored log history.
    pub fn replay(job: &Job) -> Vec<JobEvent> {
        let mut events = Vec::with_capacity(job.log.len() + 1);
        events.push(Self::status(job));
        events.extend(job.log.iter().map(|line| Self::log(job, line.clone())));
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_job_is_pending() {
        let job = Job::new("content".into(), json!({"topic": "space travel"}));
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.started_at().is_none());
        assert!(job.result().is_none());
        assert!(job.error().is_none());
        assert_eq!(job.revision(), 0);
    }

    #[test]
    fn test_phase_transitions_move_forward_only() {
        let mut job = Job::new("content".into(), json!({}));
        assert_eq!(
            job.apply(JobUpdate::Complete { result: json!("x") }),
            Err(JobStatus::Completed)
        );

        job.apply(JobUpdate::Start { input: None }).unwrap();
        assert_eq!(job.status(), JobStatus::Running);
        assert!(job.started_at().is_some());

        assert_eq!(
            job.apply(JobUpdate::Start { input: None }),
            Err(JobStatus::Running)
        );

        job.apply(JobUpdate::Complete { result: json!("done") }).unwrap();
        assert_eq!(job.result(), Some(&json!("done")));
        assert!(job.completed_at().is_some());

        assert_eq!(
            job.apply(JobUpdate::Fail { error: "late".into() }),
            Err(JobStatus::Error)
        );
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.revision(), 2);
    }

    #[test]
    fn test_start_can_override_input() {
        let mut job = Job::new("agent".into(), json!({"prompt": "first"}));
        job.apply(JobUpdate::Start {
            input: Some(json!({"prompt": "second"})),
        })
        .unwrap();
        assert_eq!(job.input(), &json!({"prompt": "second"}));
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("Running".parse::<JobStatus>().unwrap(), JobStatus::Running);
        assert!("finished".parse::<JobStatus>().is_err());
        assert_eq!(JobStatus::Error.to_string(), "error");
        assert!(JobStatus::Error.is_terminal());
        assert!(JobStatus::Pending.is_active());
    }

    #[test]
    fn test_event_serializes_flat_with_type_tag() {
        let job = Job::new("content".into(), json!({}));
        let event = JobEvent::log(&job, "Researching");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "log");
        assert_eq!(json["message"], "Researching");
        assert_eq!(json["seq"], 0);

        let back: JobEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_snapshot_skips_absent_fields() {
        let job = Job::new("content".into(), json!({"topic": "t"}));
        let json = serde_json::to_string(&job.snapshot()).unwrap();
        assert!(json.contains("\"status\":\"pending\""));
        assert!(!json.contains("result"));
        assert!(!json.contains("started_at"));
    }

    #[test]
    fn test_replay_is_status_then_log() {
        let mut job = Job::new("content".into(), json!({}));
        job.push_log("one".into());
        job.push_log("two".into());
        let replay = JobEvent::replay(&job);
        assert_eq!(replay.len(), 3);
        assert!(matches!(replay[0].kind, EventKind::Status { .. }));
        assert!(replay.iter().all(|e| e.seq == 2));
        assert_eq!(
            replay[2].kind,
            EventKind::Log {
                message: "two".into()
            }
        );
    }
}
