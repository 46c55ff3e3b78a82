// crates/server/src/workflows/agent.rs
//! Simulated agent run: paced provisioning steps and a markdown report.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use crewdeck_jobs::{Sanitizer, WorkContext};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{paced_steps, ValidationError, Workflow};

const MAX_PROMPT_CHARS: usize = 4096;
const MAX_MODEL_CHARS: usize = 64;
const DEFAULT_PROMPT: &str = "Generate a friendly welcome message";

const STEPS: [&str; 5] = [
    "Provisioning container",
    "Pulling prompt configuration",
    "Warming up model",
    "Executing agent workflow",
    "Aggregating final response",
];

/// Model parameters for one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default)]
    pub config: AgentConfig,
}

impl AgentInput {
    fn check(&self) -> Result<(), ValidationError> {
        if let Some(prompt) = &self.prompt {
            if prompt.trim().is_empty() {
                return Err(ValidationError::new("prompt cannot be empty if provided"));
            }
            if prompt.chars().count() > MAX_PROMPT_CHARS {
                return Err(ValidationError::new(format!(
                    "prompt must be at most {MAX_PROMPT_CHARS} characters"
                )));
            }
        }
        let config = &self.config;
        if config.model.trim().is_empty() || config.model.chars().count() > MAX_MODEL_CHARS {
            return Err(ValidationError::new(format!(
                "config.model must be 1 to {MAX_MODEL_CHARS} characters"
            )));
        }
        if !(0.0..=2.0).contains(&config.temperature) {
            return Err(ValidationError::new("config.temperature must be between 0.0 and 2.0"));
        }
        if !(64..=8192).contains(&config.max_tokens) {
            return Err(ValidationError::new("config.max_tokens must be between 64 and 8192"));
        }
        Ok(())
    }
}

pub struct AgentWorkflow {
    step_delay: Duration,
    sanitizer: Sanitizer,
}

impl AgentWorkflow {
    pub fn new(step_delay: Duration, sanitizer: Sanitizer) -> Self {
        Self {
            step_delay,
            sanitizer,
        }
    }

    fn render(&self, job_id: &str, input: &AgentInput) -> String {
        let prompt = self
            .sanitizer
            .sanitize(input.prompt.as_deref().unwrap_or(DEFAULT_PROMPT));
        let config = &input.config;
        format!(
            "# Agent Run Result\n\
             \n\
             ## Prompt Snapshot\n\
             {prompt}\n\
             \n\
             ## Configuration\n\
             - Model: {model}\n\
             - Temperature: {temperature}\n\
             - Max Tokens: {max_tokens}\n\
             \n\
             ## Agent Response\n\
             This is a simulated response. Point the service at a live agent backend to replace it with real output.\n\
             \n\
             ## Execution Metadata\n\
             - Completed At: {completed_at}\n\
             - Job ID: {job_id}\n",
            model = config.model,
            temperature = config.temperature,
            max_tokens = config.max_tokens,
            completed_at = Utc::now().to_rfc3339(),
        )
    }
}

#[async_trait]
impl Workflow for AgentWorkflow {
    fn kind(&self) -> &'static str {
        "agent"
    }

    fn validate(&self, input: Value) -> Result<Value, ValidationError> {
        let input = if input.is_null() {
            AgentInput::default()
        } else {
            serde_json::from_value::<AgentInput>(input)
                .map_err(|e| ValidationError::new(format!("invalid agent input: {e}")))?
        };
        input.check()?;
        serde_json::to_value(&input)
            .map_err(|e| ValidationError::new(format!("invalid agent input: {e}")))
    }

    async fn execute(&self, ctx: WorkContext) -> anyhow::Result<Value> {
        let input: AgentInput = serde_json::from_value(ctx.input.clone())?;
        tracing::debug!(job_id = %ctx.job_id, model = %input.config.model, "agent run starting");

        paced_steps(&ctx.progress, self.step_delay, STEPS).await;

        let preview = self
            .sanitizer
            .sanitize(input.prompt.as_deref().unwrap_or("(no prompt supplied)"));
        ctx.progress.report(format!("Prompt preview: {preview}"));

        Ok(Value::String(self.render(&ctx.job_id.to_string(), &input)))
    }
}
