// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use crewdeck_jobs::{JobRunner, JobStore, ProgressBroadcaster, Sanitizer};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::workflows::WorkflowRegistry;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    pub config: Config,
    /// Every job record for this process.
    pub store: Arc<JobStore>,
    /// Per-job subscribers for the stream endpoints.
    pub broadcaster: Arc<ProgressBroadcaster>,
    pub runner: Arc<JobRunner>,
    pub workflows: WorkflowRegistry,
    /// Cancelled when the server begins shutting down; open streams close on it.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Build the state the binary runs with, workflows taken from `config`.
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let workflows = WorkflowRegistry::from_config(&config)?;
        Ok(Self::with_workflows(config, workflows))
    }

    /// Build state around an explicit workflow set.
    pub fn with_workflows(config: Config, workflows: WorkflowRegistry) -> Arc<Self> {
        let store = Arc::new(JobStore::new(config.max_concurrent_jobs));
        let broadcaster = Arc::new(ProgressBroadcaster::new(Arc::clone(&store)));
        let runner = Arc::new(JobRunner::new(
            Arc::clone(&store),
            Arc::clone(&broadcaster),
            Sanitizer::new(config.sanitize_max_len),
            config.job_timeout,
        ));
        Arc::new(Self {
            start_time: Instant::now(),
            config,
            store,
            broadcaster,
            runner,
            workflows,
            shutdown: CancellationToken::new(),
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
