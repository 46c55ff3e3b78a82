// crates/server/src/workflows/content.rs
//! Simulated content crew: research, strategy and writer agents in turn.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use crewdeck_jobs::WorkContext;
use serde_json::{json, Value};

use super::{paced_steps, required_str, ValidationError, Workflow};

const MAX_TOPIC_CHARS: usize = 200;

pub struct ContentWorkflow {
    step_delay: Duration,
}

impl ContentWorkflow {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

fn render(topic: &str) -> String {
    format!(
        "# {topic}: A Comprehensive Overview\n\
         \n\
         ## Introduction\n\
         This is simulated output from the content crew. With a live model behind it, this section would hold research-backed content about {topic}.\n\
         \n\
         ## Key Points\n\
         - Research, strategy and writing handled by separate agents\n\
         - Progress streamed live while the crew works\n\
         \n\
         ## Next Steps\n\
         1. Connect a model provider\n\
         2. Restart the service\n\
         3. Generate real content\n\
         \n\
         ---\n\
         *Generated in demo mode at {generated_at}*\n",
        generated_at = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
    )
}

#[async_trait]
impl Workflow for ContentWorkflow {
    fn kind(&self) -> &'static str {
        "content"
    }

    fn validate(&self, input: Value) -> Result<Value, ValidationError> {
        let topic = required_str(&input, "topic", MAX_TOPIC_CHARS)?;
        Ok(json!({ "topic": topic }))
    }

    async fn execute(&self, ctx: WorkContext) -> anyhow::Result<Value> {
        let topic = ctx
            .input
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("content job has no topic"))?
            .to_string();

        paced_steps(
            &ctx.progress,
            self.step_delay,
            [
                "Initializing content generation crew".to_string(),
                "Research Agent: starting research".to_string(),
                format!("Research Agent: gathering information on '{topic}'"),
                "Strategy Agent: developing content framework".to_string(),
                "Writer Agent: drafting content".to_string(),
            ],
        )
        .await;

        Ok(json!({
            "topic": topic,
            "content": render(&topic),
        }))
    }
}
