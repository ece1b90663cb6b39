//! Tool trait and the call/result types that flow through the executor.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;

/// A structured call extracted from model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Identity used for repetition detection: name plus canonical arguments.
    pub fn signature(&self) -> String {
        format!("{}:{}", self.name, self.arguments)
    }
}

/// Outcome of one call. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub tool_call_id: String,
    pub tool_name: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ExecutionResult {
    pub fn success(call: &ToolCall, result: serde_json::Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-invocation context handed to tools.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Routes sandbox writes to a task-scoped directory when set.
    pub task_id: Option<String>,
}

impl ToolContext {
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }
}

/// Output from a successful tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub result: serde_json::Value,
    pub duration: Duration,
}

impl ToolOutput {
    /// Structured output.
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }

    /// Plain text output.
    pub fn text(text: impl Into<String>, duration: Duration) -> Self {
        Self {
            result: serde_json::Value::String(text.into()),
            duration,
        }
    }

    /// Render the result as text for protocol content blocks and model history.
    pub fn to_text(&self) -> String {
        match &self.result {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Catalog entry advertised for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
    #[serde(default)]
    pub read_only: bool,
}

/// A callable operation exposed to models and protocol clients.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for the arguments object.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the tool.
    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;

    /// Whether the tool only reads state.
    fn read_only(&self) -> bool {
        false
    }

    /// Deadline for one call with these arguments. `None` uses the registry
    /// default.
    fn execution_timeout(&self, _params: &serde_json::Value) -> Option<Duration> {
        None
    }

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.parameters_schema(),
            read_only: self.read_only(),
        }
    }
}

type BoxedHandler = Box<
    dyn Fn(
            serde_json::Value,
            ToolContext,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// A tool backed by an async closure.
pub struct FnTool {
    name: String,
    description: String,
    schema: serde_json::Value,
    handler: BoxedHandler,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: serde_json::Value,
        handler: F,
    ) -> Self
    where
        F: Fn(serde_json::Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            handler: Box::new(move |params, ctx| Box::pin(handler(params, ctx))),
        }
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> serde_json::Value {
        self.schema.clone()
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let result = (self.handler)(params, ctx.clone()).await?;
        Ok(ToolOutput::success(result, start.elapsed()))
    }
}

/// Fetch a required string argument.
pub(crate) fn require_str<'a>(
    params: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{}' parameter", key)))
}

/// Fetch an optional string argument.
pub(crate) fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}
