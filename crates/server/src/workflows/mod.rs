// crates/server/src/workflows/mod.rs
//! Work functions the runner can execute, keyed by job kind.

pub mod agent;
pub mod content;
pub mod remote;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crewdeck_jobs::{ProgressReporter, Sanitizer, WorkContext};
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;

pub use agent::AgentWorkflow;
pub use content::ContentWorkflow;
pub use remote::CrewServiceWorkflow;

/// Input rejected before a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A kind of job the server knows how to run.
#[async_trait]
pub trait Workflow: Send + Sync {
    /// Job kind this workflow handles (e.g. "agent").
    fn kind(&self) -> &'static str;

    /// Check the request payload and return the normalized input to store.
    fn validate(&self, input: Value) -> Result<Value, ValidationError>;

    /// Do the work. Progress goes through `ctx.progress`.
    async fn execute(&self, ctx: WorkContext) -> anyhow::Result<Value>;
}

/// All workflows enabled for this process.
pub struct WorkflowRegistry {
    workflows: BTreeMap<&'static str, Arc<dyn Workflow>>,
    default_kind: String,
}

impl WorkflowRegistry {
    pub fn new(default_kind: impl Into<String>) -> Self {
        Self {
            workflows: BTreeMap::new(),
            default_kind: default_kind.into(),
        }
    }

    /// Build the registry the binary runs with.
    ///
    /// `crew` is only available when a crew-service URL is configured.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let sanitizer = Sanitizer::new(config.sanitize_max_len);
        let mut registry = Self::new(config.default_workflow.clone());
        registry.register(Arc::new(AgentWorkflow::new(config.step_delay, sanitizer)));
        registry.register(Arc::new(ContentWorkflow::new(config.step_delay)));
        if let Some(url) = &config.crew_service_url {
            registry.register(Arc::new(CrewServiceWorkflow::new(
                url,
                config.crew_service_timeout,
            )?));
        }

        if registry.get(&registry.default_kind).is_none() {
            anyhow::bail!(
                "default workflow '{}' is not available (known: {})",
                registry.default_kind,
                registry.kinds().join(", ")
            );
        }
        tracing::info!(workflows = ?registry.kinds(), default = %registry.default_kind, "workflows registered");
        Ok(registry)
    }

    pub fn register(&mut self, workflow: Arc<dyn Workflow>) {
        self.workflows.insert(workflow.kind(), workflow);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Workflow>> {
        self.workflows.get(kind).cloned()
    }

    /// Pick the workflow for a request, falling back to the default kind.
    pub fn resolve(&self, kind: Option<&str>) -> Result<Arc<dyn Workflow>, ValidationError> {
        let kind = kind.map(str::trim).filter(|k| !k.is_empty()).unwrap_or(self.default_kind.as_str());
        self.get(kind).ok_or_else(|| {
            ValidationError::new(format!(
                "Unknown job kind '{kind}' (expected one of: {})",
                self.kinds().join(", ")
            ))
        })
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.workflows.keys().copied().collect()
    }

    pub fn default_kind(&self) -> &str {
        &self.default_kind
    }
}

/// Report each step, then wait `delay` before the next one.
pub(crate) async fn paced_steps<I, S>(progress: &ProgressReporter, delay: Duration, steps: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for step in steps {
        progress.report(step);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// Read a required, non-blank string field.
pub(crate) fn required_str<'a>(
    input: &'a Value,
    field: &str,
    max_chars: usize,
) -> Result<&'a str, ValidationError> {
    let value = input
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ValidationError::new(format!("'{field}' is required and cannot be blank")))?;
    if value.chars().count() > max_chars {
        return Err(ValidationError::new(format!(
            "'{field}' must be at most {max_chars} characters"
        )));
    }
    Ok(value)
}
