//! Expose the agent loop itself as a tool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::agent::{AgentLoop, AgentLoopInput, DEFAULT_MAX_ITERATIONS};
use crate::error::ToolError;
use crate::tools::tool::{Tool, ToolContext, ToolOutput};

/// Runs a full agent loop over the base tool set.
///
/// The wrapped loop's registry never contains this tool, so a model inside
/// the loop cannot start another loop.
pub struct AgentLoopTool {
    agent: Arc<AgentLoop>,
    iteration_budget: Duration,
}

impl AgentLoopTool {
    /// `iteration_budget` is the time one iteration may take. A run gets that
    /// budget once per requested iteration.
    pub fn new(agent: Arc<AgentLoop>, iteration_budget: Duration) -> Self {
        Self {
            agent,
            iteration_budget,
        }
    }

    /// Deadline for a run asking for `max_iterations` iterations.
    fn run_deadline(&self, max_iterations: u64) -> Duration {
        let iterations = u32::try_from(max_iterations).unwrap_or(u32::MAX);
        self.iteration_budget.saturating_mul(iterations)
    }
}

#[async_trait]
impl Tool for AgentLoopTool {
    fn name(&self) -> &str {
        "agent_loop"
    }

    fn description(&self) -> &str {
        "Run an autonomous agent: the model is prompted repeatedly, tool calls in its \
         replies are executed, and results are fed back until it answers without calling \
         tools or a safety limit is reached."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string", "description": "Task for the agent" },
                "system": { "type": "string", "description": "System prompt" },
                "model": { "type": "string", "description": "Model name (default from config)" },
                "max_iterations": {
                    "type": "integer",
                    "minimum": 1,
                    "default": 10
                },
                "task_id": {
                    "type": "string",
                    "description": "Routes draft writes to tasks/<task_id> in the sandbox"
                }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let mut input: AgentLoopInput = serde_json::from_value(params)
            .map_err(|e| ToolError::InvalidParameters(format!("invalid agent_loop input: {}", e)))?;
        if input.task_id.is_none() {
            input.task_id = ctx.task_id.clone();
        }

        let result = self.agent.run(input).await;
        let value = serde_json::to_value(&result)
            .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode result: {}", e)))?;
        Ok(ToolOutput::success(value, start.elapsed()))
    }

    fn execution_timeout(&self, params: &serde_json::Value) -> Option<Duration> {
        let max_iterations = params
            .get("max_iterations")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_ITERATIONS as u64);
        Some(self.run_deadline(max_iterations))
    }
}
