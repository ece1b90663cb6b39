//! Iterative model → parse → execute loop.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::guard::{DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MAX_REPEATED_CALLS, LoopGuard};
use crate::llm::{ChatMessage, ChatRequest, LlmProvider, chat_with_timeout};
use crate::tools::ToolRegistry;
use crate::tools::parser::parse_tool_calls;
use crate::tools::tool::{ExecutionResult, ToolContext};

/// Default iteration cap.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;
/// Response text when the iteration cap is hit.
pub const MAX_ITERATIONS_RESPONSE: &str = "Max iterations reached";

fn default_max_iterations() -> usize {
    DEFAULT_MAX_ITERATIONS
}

/// Input to one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopInput {
    pub prompt: String,
    #[serde(default)]
    pub system: String,
    /// Falls back to the loop's default model.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Routes sandbox writes to `tasks/<task_id>`.
    #[serde(default)]
    pub task_id: Option<String>,
}

impl AgentLoopInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: String::new(),
            model: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            task_id: None,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = system.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    FinalAnswer,
    MaxIterationsExhausted,
    InfiniteLoopDetected,
    ConsecutiveErrorsExceeded,
}

impl Termination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FinalAnswer => "final_answer",
            Self::MaxIterationsExhausted => "max_iterations_exhausted",
            Self::InfiniteLoopDetected => "infinite_loop_detected",
            Self::ConsecutiveErrorsExceeded => "consecutive_errors_exceeded",
        }
    }
}

/// Result of one agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopResult {
    pub response: String,
    pub tool_calls_made: usize,
    pub iterations: usize,
    pub execution_trace: Vec<ExecutionResult>,
    pub termination: Termination,
    /// Set for every termination other than a final answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Loop tuning.
#[derive(Debug, Clone)]
pub struct AgentLoopConfig {
    pub default_model: String,
    pub max_repeated_calls: usize,
    pub max_consecutive_errors: usize,
    pub llm_timeout: Duration,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        Self {
            default_model: "llama3.1".to_string(),
            max_repeated_calls: DEFAULT_MAX_REPEATED_CALLS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            llm_timeout: Duration::from_secs(120),
        }
    }
}

/// Drives a model through repeated tool rounds.
pub struct AgentLoop {
    llm: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    config: AgentLoopConfig,
}

/// Accumulated state of one run.
struct Run {
    history: Vec<ChatMessage>,
    trace: Vec<ExecutionResult>,
    tool_calls_made: usize,
}

impl Run {
    fn finish(
        self,
        response: impl Into<String>,
        iterations: usize,
        termination: Termination,
        error: Option<String>,
    ) -> AgentLoopResult {
        let result = AgentLoopResult {
            response: response.into(),
            tool_calls_made: self.tool_calls_made,
            iterations,
            execution_trace: self.trace,
            termination,
            error,
        };
        tracing::info!(
            termination = termination.as_str(),
            iterations,
            tool_calls = result.tool_calls_made,
            "Agent loop finished"
        );
        result
    }
}

impl AgentLoop {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        config: AgentLoopConfig,
    ) -> Self {
        Self {
            llm,
            registry,
            config,
        }
    }

    /// The tools available to the model.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run until a final answer or a guard trips. Never fails: every
    /// termination is reported in the result.
    pub async fn run(&self, input: AgentLoopInput) -> AgentLoopResult {
        let model = input
            .model
            .clone()
            .unwrap_or_else(|| self.config.default_model.clone());
        let ctx = match input.task_id {
            Some(ref task_id) => ToolContext::default().with_task_id(task_id.clone()),
            None => ToolContext::default(),
        };

        let mut run = Run {
            history: Vec::new(),
            trace: Vec::new(),
            tool_calls_made: 0,
        };
        if !input.system.is_empty() {
            run.history.push(ChatMessage::system(input.system.clone()));
        }
        run.history.push(ChatMessage::user(input.prompt.clone()));

        let mut guard = LoopGuard::new(
            self.config.max_repeated_calls,
            self.config.max_consecutive_errors,
        );

        for iteration in 1..=input.max_iterations {
            tracing::debug!(iteration, model = %model, "Agent iteration");

            let request = ChatRequest::new(model.clone(), run.history.clone());
            let reply =
                match chat_with_timeout(self.llm.as_ref(), request, self.config.llm_timeout).await
                {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::warn!(iteration, error = %e, timeout = e.is_timeout(), "Model call failed");
                        if guard.observe_outcome(true) {
                            let error = format!(
                                "{} consecutive failed iterations; last error: {}",
                                guard.consecutive_errors(),
                                e
                            );
                            return run.finish(
                                error.clone(),
                                iteration,
                                Termination::ConsecutiveErrorsExceeded,
                                Some(error),
                            );
                        }
                        continue;
                    }
                };

            let content = reply.content;
            run.history.push(ChatMessage::assistant(content.clone()));

            let calls = parse_tool_calls(&content);
            if calls.is_empty() {
                return run.finish(content, iteration, Termination::FinalAnswer, None);
            }

            if guard.observe_calls(&calls) {
                let error = format!(
                    "Identical tool calls repeated {} times in a row",
                    guard.repeats() + 1
                );
                tracing::warn!(iteration, "{}", error);
                return run.finish(
                    error.clone(),
                    iteration,
                    Termination::InfiniteLoopDetected,
                    Some(error),
                );
            }

            let results = self.registry.execute_many(&calls, &ctx).await;
            run.tool_calls_made += results.len();
            let all_failed = results.iter().all(ExecutionResult::is_error);

            for result in &results {
                run.history.push(ChatMessage::tool(
                    result.tool_call_id.clone(),
                    result.tool_name.clone(),
                    render_result(result),
                ));
            }
            run.trace.extend(results);

            if guard.observe_outcome(all_failed) {
                let error = format!(
                    "{} consecutive iterations where every tool call failed",
                    guard.consecutive_errors()
                );
                tracing::warn!(iteration, "{}", error);
                return run.finish(
                    error.clone(),
                    iteration,
                    Termination::ConsecutiveErrorsExceeded,
                    Some(error),
                );
            }
        }

        let error = format!("Reached max iterations ({})", input.max_iterations);
        run.finish(
            MAX_ITERATIONS_RESPONSE,
            input.max_iterations,
            Termination::MaxIterationsExhausted,
            Some(error),
        )
    }
}

/// History content for a tool result: the value itself, or a tagged error object.
fn render_result(result: &ExecutionResult) -> String {
    match (&result.result, &result.error) {
        (_, Some(error)) => serde_json::json!({
            "error": error,
            "tool": result.tool_name,
            "source": "tool_execution",
        })
        .to_string(),
        (Some(serde_json::Value::String(s)), None) => s.clone(),
        (Some(value), None) => value.to_string(),
        (None, None) => "null".to_string(),
    }
}
