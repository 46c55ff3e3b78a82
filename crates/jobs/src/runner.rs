//! Drives a job from `running` to a terminal state.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use metrics::{counter, histogram};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::broadcast::ProgressBroadcaster;
use crate::error::JobError;
use crate::sanitize::Sanitizer;
use crate::store::JobStore;
use crate::types::{Job, JobEvent, JobId, JobUpdate};

/// Fallback recorded when a failure carries no usable text.
const GENERIC_FAILURE: &str = "Execution failed";

/// Handed to a work function: what to work on and where to report progress.
pub struct WorkContext {
    pub job_id: JobId,
    pub kind: String,
    pub input: Value,
    pub progress: ProgressReporter,
}

/// Cloneable progress sink for a running job.
///
/// Lines are forwarded to the job's supervising task, which sanitizes,
/// stores and publishes them in the order they were reported.
#[derive(Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<String>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::UnboundedSender<String>) -> Self {
        Self { tx }
    }

    pub fn report(&self, message: impl Into<String>) {
        // The job already finished; late lines are dropped.
        let _ = self.tx.send(message.into());
    }
}

enum Outcome {
    Finished(anyhow::Result<Value>),
    TimedOut,
    Interrupted,
}

/// Starts jobs and supervises them until they reach a terminal state.
///
/// Each run gets one tokio task. The task owns every write to its job after
/// the initial claim, which is what keeps per-job event order strict.
pub struct JobRunner {
    store: Arc<JobStore>,
    broadcaster: Arc<ProgressBroadcaster>,
    sanitizer: Sanitizer,
    timeout: Duration,
    shutdown: CancellationToken,
    tasks: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl JobRunner {
    pub fn new(
        store: Arc<JobStore>,
        broadcaster: Arc<ProgressBroadcaster>,
        sanitizer: Sanitizer,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            broadcaster,
            sanitizer,
            timeout,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// True once [`JobRunner::shutdown`] has begun; no new run is accepted.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|poisoned| {
            tracing::error!("runner task map mutex poisoned; continuing with inner state");
            poisoned.into_inner()
        })
    }

    /// Claim `job_id` and spawn its supervising task.
    ///
    /// The claim (`pending -> running`) happens before this returns, so a
    /// second call for the same job fails with [`JobError::Conflict`] and
    /// `work` is never invoked for it. After shutdown has begun every call
    /// fails with [`JobError::ShuttingDown`] and the job stays `pending`.
    /// `input` optionally replaces the stored input at start time.
    ///
    /// Must be called from within a tokio runtime.
    pub fn run<F, Fut>(&self, job_id: JobId, input: Option<Value>, work: F) -> Result<Job, JobError>
    where
        F: FnOnce(WorkContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        if self.is_shutting_down() {
            return Err(JobError::ShuttingDown);
        }
        let job = self.store.update(job_id, JobUpdate::Start { input })?;
        self.broadcaster.publish(job_id, JobEvent::status(&job));

        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = WorkContext {
            job_id,
            kind: job.kind().to_string(),
            input: job.input().clone(),
            progress: ProgressReporter::new(tx),
        };
        let supervisor = Supervisor {
            store: Arc::clone(&self.store),
            broadcaster: Arc::clone(&self.broadcaster),
            sanitizer: self.sanitizer,
            timeout: self.timeout,
            shutdown: self.shutdown.clone(),
            kind: job.kind().to_string(),
            started: Instant::now(),
        };
        let handle = tokio::spawn(supervisor.drive(job_id, work(ctx), rx));

        let mut tasks = self.lock_tasks();
        tasks.retain(|_, h| !h.is_finished());
        tasks.insert(job_id, handle);
        drop(tasks);

        tracing::info!(job_id = %job_id, kind = %job.kind(), "job started");
        Ok(job)
    }

    /// Wait for the supervising task of `job_id` to finish.
    ///
    /// Returns `false` when no task is tracked for that job (never started,
    /// or already joined).
    pub async fn join(&self, job_id: JobId) -> bool {
        let handle = self.lock_tasks().remove(&job_id);
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    tracing::error!(job_id = %job_id, error = %e, "job task ended abnormally");
                }
                true
            }
            None => false,
        }
    }

    /// Number of supervising tasks still running.
    pub fn running_tasks(&self) -> usize {
        self.lock_tasks().values().filter(|h| !h.is_finished()).count()
    }

    /// Interrupt every running job, wait up to `grace` for them to record
    /// their terminal state, then abort whatever is left.
    pub async fn shutdown(&self, grace: Duration) {
        self.shutdown.cancel();
        let handles: Vec<(JobId, JoinHandle<()>)> = self.lock_tasks().drain().collect();
        if handles.is_empty() {
            return;
        }
        tracing::info!(jobs = handles.len(), grace_ms = grace.as_millis() as u64, "waiting for running jobs");

        let deadline = tokio::time::Instant::now() + grace;
        for (job_id, mut handle) in handles {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                tracing::warn!(job_id = %job_id, "job did not stop within grace period; aborting");
                handle.abort();
            }
        }
    }
}

/// State moved into a job's task.
struct Supervisor {
    store: Arc<JobStore>,
    broadcaster: Arc<ProgressBroadcaster>,
    sanitizer: Sanitizer,
    timeout: Duration,
    shutdown: CancellationToken,
    kind: String,
    started: Instant,
}

impl Supervisor {
    async fn drive<Fut>(self, job_id: JobId, work: Fut, mut progress: mpsc::UnboundedReceiver<String>)
    where
        Fut: Future<Output = anyhow::Result<Value>> + Send,
    {
        let mut work = Box::pin(AssertUnwindSafe(work).catch_unwind());
        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let outcome = loop {
            tokio::select! {
                biased;
                Some(line) = progress.recv() => self.record_log(job_id, &line),
                result = &mut work => {
                    break Outcome::Finished(result.unwrap_or_else(|panic| Err(panic_to_error(panic))));
                }
                _ = &mut deadline => break Outcome::TimedOut,
                _ = self.shutdown.cancelled() => break Outcome::Interrupted,
            }
        };
        drop(work);

        // Lines reported right before the work future resolved.
        while let Ok(line) = progress.try_recv() {
            self.record_log(job_id, &line);
        }
        drop(progress);

        match outcome {
            Outcome::Finished(Ok(result)) => self.complete(job_id, result),
            Outcome::Finished(Err(err)) => self.fail(job_id, &format!("{err:#}"), "failed"),
            Outcome::TimedOut => {
                self.fail(job_id, &format!("Job timed out after {:?}", self.timeout), "timeout")
            }
            Outcome::Interrupted => {
                self.fail(job_id, "Job interrupted: server shutting down", "interrupted")
            }
        }
    }

    fn record_log(&self, job_id: JobId, line: &str) {
        let message = self.sanitizer.sanitize(line);
        if message.is_empty() {
            return;
        }
        match self.store.append_log(job_id, message.clone()) {
            Ok(job) => {
                self.broadcaster.publish(job_id, JobEvent::log(&job, message));
            }
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "failed to append job log"),
        }
    }

    fn complete(&self, job_id: JobId, result: Value) {
        self.record_log(job_id, "Job completed");
        match self.store.update(job_id, JobUpdate::Complete { result }) {
            Ok(job) => {
                self.broadcaster.publish(job_id, JobEvent::status(&job));
                self.record_metrics("completed");
                tracing::info!(
                    job_id = %job_id,
                    kind = %self.kind,
                    duration_secs = self.started.elapsed().as_secs_f64(),
                    "job completed"
                );
            }
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "failed to record job completion"),
        }
    }

    fn fail(&self, job_id: JobId, raw: &str, outcome: &'static str) {
        let mut message = self.sanitizer.sanitize(raw);
        if message.is_empty() {
            message = GENERIC_FAILURE.to_string();
        }
        self.record_log(job_id, &format!("Job failed: {message}"));
        match self.store.update(job_id, JobUpdate::Fail { error: message.clone() }) {
            Ok(job) => {
                // The terminal status is always the last event of a job.
                self.broadcaster.publish(job_id, JobEvent::error(&job, message.clone()));
                self.broadcaster.publish(job_id, JobEvent::status(&job));
                self.record_metrics(outcome);
                tracing::warn!(
                    job_id = %job_id,
                    kind = %self.kind,
                    outcome,
                    error = %message,
                    "job failed"
                );
            }
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "failed to record job failure"),
        }
    }

    fn record_metrics(&self, outcome: &'static str) {
        counter!("jobs_finished_total", "kind" => self.kind.clone(), "outcome" => outcome).increment(1);
        histogram!("job_duration_seconds", "kind" => self.kind.clone())
            .record(self.started.elapsed().as_secs_f64());
    }
}

fn panic_to_error(panic: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow::anyhow!("work panicked: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EventKind, JobStatus};
    use serde_json::json;

    fn runner(timeout: Duration) -> JobRunner {
        let store = Arc::new(JobStore::new(8));
        let broadcaster = Arc::new(ProgressBroadcaster::new(Arc::clone(&store)));
        JobRunner::new(store, broadcaster, Sanitizer::new(120), timeout)
    }

    #[tokio::test]
    async fn test_run_to_completion_records_progress_in_order() {
        let runner = runner(Duration::from_secs(5));
        let job = runner.store().create("content", json!({"topic": "t"})).unwrap();

        runner
            .run(job.id(), None, |ctx| async move {
                ctx.progress.report("step one");
                ctx.progress.report("step two");
                Ok(json!({"topic": ctx.input["topic"]}))
            })
            .unwrap();
        assert!(runner.join(job.id()).await);

        let job = runner.store().get(job.id()).unwrap();
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.result(), Some(&json!({"topic": "t"})));
        assert_eq!(job.log(), ["step one", "step two", "Job completed"]);
        assert!(job.started_at().is_some() && job.completed_at().is_some());
    }

    #[tokio::test]
    async fn test_second_run_is_conflict_and_work_not_invoked() {
        let runner = runner(Duration::from_secs(5));
        let id = runner.store().create("content", json!({})).unwrap().id();

        runner
            .run(id, None, |_ctx| async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(json!(null))
            })
            .unwrap();

        let invoked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&invoked);
        let err = runner
            .run(id, None, move |_ctx| {
                flag.store(true, std::sync::atomic::Ordering::SeqCst);
                async { Ok(json!(null)) }
            })
            .unwrap_err();
        assert!(matches!(err, JobError::Conflict { current: JobStatus::Running, .. }));

        runner.join(id).await;
        let err = runner.run(id, None, |_ctx| async { Ok(json!(null)) }).unwrap_err();
        assert!(matches!(err, JobError::Conflict { current: JobStatus::Completed, .. }));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failure_is_sanitized() {
        let runner = runner(Duration::from_secs(5));
        let id = runner.store().create("agent", json!({})).unwrap().id();

        runner
            .run(id, None, |_ctx| async {
                Err(anyhow::anyhow!("auth failed for ops@example.com with key 12345678901234"))
            })
            .unwrap();
        runner.join(id).await;

        let job = runner.store().get(id).unwrap();
        assert_eq!(job.status(), JobStatus::Error);
        let error = job.error().unwrap();
        assert!(!error.contains("ops@example.com"));
        assert!(!error.contains("12345678901234"));
        assert!(job.result().is_none());
        assert!(job.log().last().unwrap().starts_with("Job failed:"));
    }

    #[tokio::test]
    async fn test_timeout_marks_job_as_error() {
        let runner = runner(Duration::from_millis(30));
        let id = runner.store().create("agent", json!({})).unwrap().id();

        runner
            .run(id, None, |_ctx| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(json!(null))
            })
            .unwrap();
        runner.join(id).await;

        let job = runner.store().get(id).unwrap();
        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(job.error(), Some("Job timed out after 30ms"));
        assert_eq!(runner.store().active_count(), 0);
    }

    #[tokio::test]
    async fn test_panicking_work_is_recorded_as_failure() {
        let runner = runner(Duration::from_secs(5));
        let id = runner.store().create("agent", json!({})).unwrap().id();

        runner
            .run(id, None, |_ctx| async {
                if true {
                    panic!("boom");
                }
                Ok(json!(null))
            })
            .unwrap();
        runner.join(id).await;

        let job = runner.store().get(id).unwrap();
        assert_eq!(job.error(), Some("work panicked: boom"));
    }

    #[tokio::test]
    async fn test_live_events_follow_lifecycle_order() {
        let runner = runner(Duration::from_secs(5));
        let id = runner.store().create("content", json!({})).unwrap().id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        runner.broadcaster().subscribe(id, tx);

        runner
            .run(id, None, |ctx| async move {
                ctx.progress.report("working");
                Ok(json!("done"))
            })
            .unwrap();
        runner.join(id).await;

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(match ev.kind {
                EventKind::Status { job } => format!("status:{}", job.status),
                EventKind::Log { message } => format!("log:{message}"),
                EventKind::Error { message } => format!("error:{message}"),
            });
        }
        assert_eq!(
            kinds,
            [
                "status:pending",
                "status:running",
                "log:working",
                "log:Job completed",
                "status:completed"
            ]
        );
    }

    #[tokio::test]
    async fn test_terminal_status_is_last_and_carries_final_line() {
        let runner = runner(Duration::from_secs(5));
        let id = runner.store().create("agent", json!({})).unwrap().id();
        let (tx, mut rx) = mpsc::unbounded_channel();
        runner.broadcaster().subscribe(id, tx);

        runner
            .run(id, None, |_ctx| async { anyhow::bail!("model offline") })
            .unwrap();
        runner.join(id).await;

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        let last = events.last().unwrap();
        assert!(last.is_terminal());
        match &last.kind {
            EventKind::Status { job } => {
                assert_eq!(job.log.last().map(String::as_str), Some("Job failed: model offline"));
            }
            other => panic!("expected status, got {other:?}"),
        }
        assert_eq!(
            events[events.len() - 2].kind,
            EventKind::Error {
                message: "model offline".into()
            }
        );

        // Nothing touches the record once it is terminal.
        let job = runner.store().get(id).unwrap();
        assert_eq!(job.revision(), last.seq);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_running_jobs() {
        let runner = runner(Duration::from_secs(60));
        let id = runner.store().create("agent", json!({})).unwrap().id();
        runner
            .run(id, None, |_ctx| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(json!(null))
            })
            .unwrap();

        runner.shutdown(Duration::from_secs(1)).await;

        let job = runner.store().get(id).unwrap();
        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(job.error(), Some("Job interrupted: server shutting down"));
        assert_eq!(runner.running_tasks(), 0);
    }

    #[tokio::test]
    async fn test_run_after_shutdown_is_refused() {
        let runner = runner(Duration::from_secs(5));
        runner.shutdown(Duration::from_millis(10)).await;
        assert!(runner.is_shutting_down());

        let id = runner.store().create("agent", json!({})).unwrap().id();
        let err = runner.run(id, None, |_ctx| async { Ok(json!(null)) }).unwrap_err();
        assert_eq!(err, JobError::ShuttingDown);
        assert_eq!(runner.store().get(id).unwrap().status(), JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_join_unknown_job_returns_false() {
        let runner = runner(Duration::from_secs(1));
        assert!(!runner.join(uuid::Uuid::new_v4()).await);
    }
}
