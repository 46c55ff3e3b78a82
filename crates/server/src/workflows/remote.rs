// crates/server/src/workflows/remote.rs
//! Forwards a job to an external crew service over HTTP.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use crewdeck_jobs::WorkContext;
use serde_json::{json, Map, Value};

use super::{required_str, ValidationError, Workflow};

const MAX_INPUT_CHARS: usize = 4096;
/// How much of an error body to keep in the failure message.
const ERROR_BODY_PREVIEW: usize = 200;

pub struct CrewServiceWorkflow {
    client: reqwest::Client,
    process_url: String,
    timeout: Duration,
}

impl CrewServiceWorkflow {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let base = base_url.trim().trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            anyhow::bail!("crew service URL must start with http:// or https://, got '{base}'");
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build crew service HTTP client")?;
        Ok(Self {
            client,
            process_url: format!("{base}/process"),
            timeout,
        })
    }
}

#[async_trait]
impl Workflow for CrewServiceWorkflow {
    fn kind(&self) -> &'static str {
        "crew"
    }

    fn validate(&self, input: Value) -> Result<Value, ValidationError> {
        let text = required_str(&input, "input", MAX_INPUT_CHARS)?;
        let mut normalized = Map::new();
        normalized.insert("input".to_string(), Value::String(text.to_string()));
        match input.get("sheet_id") {
            None | Some(Value::Null) => {}
            Some(Value::String(id)) if !id.trim().is_empty() => {
                normalized.insert("sheet_id".to_string(), Value::String(id.trim().to_string()));
            }
            Some(_) => return Err(ValidationError::new("'sheet_id' must be a non-empty string")),
        }
        Ok(Value::Object(normalized))
    }

    async fn execute(&self, ctx: WorkContext) -> anyhow::Result<Value> {
        ctx.progress.report("Forwarding request to crew service");

        let response = self
            .client
            .post(&self.process_url)
            .json(&ctx.input)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    anyhow::anyhow!(
                        "Crew service timeout after {}s",
                        self.timeout.as_secs_f64()
                    )
                } else if e.is_connect() {
                    anyhow::anyhow!("Crew service unavailable")
                } else {
                    anyhow::anyhow!("Crew service request failed: {e}")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
            tracing::warn!(job_id = %ctx.job_id, status = %status, "crew service returned an error status");
            anyhow::bail!("Crew service error {status}: {preview}");
        }

        let body: Value = response
            .json()
            .await
            .context("Crew service returned invalid JSON")?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            let reason = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("no reason given");
            anyhow::bail!("Crew service reported failure: {reason}");
        }

        ctx.progress.report("Crew service responded");
        let actions = body
            .get("actions_taken")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        if actions > 0 {
            ctx.progress.report(format!("Crew took {actions} action(s)"));
        }

        Ok(json!({ "response": body }))
    }
}
