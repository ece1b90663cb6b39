//! Tool registry and executor.
//!
//! Tools are registered once at startup; afterwards the registry is shared
//! read-only behind an `Arc`, so lookups take no lock.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::error::ToolError;
use crate::tools::tool::{ExecutionResult, Tool, ToolCall, ToolContext, ToolDefinition, ToolOutput};

/// Default per-call deadline.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// Name-keyed collection of tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Set the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            tracing::warn!(tool = %name, "Replaced existing tool registration");
        }
    }

    /// Copy every tool from `other` into this registry.
    pub fn extend_from(&mut self, other: &ToolRegistry) {
        for tool in other.tools.values() {
            self.register(tool.clone());
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Catalog of registered tools, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Invoke a tool by name under its deadline.
    ///
    /// Panics inside the tool are caught and reported as execution failures.
    pub async fn invoke(
        &self,
        name: &str,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let timeout = tool.execution_timeout(&params).unwrap_or(self.timeout);
        let fut = AssertUnwindSafe(tool.execute(params, ctx)).catch_unwind();
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ToolError::ExecutionFailed(format!(
                "Tool '{}' panicked during execution",
                name
            ))),
            Err(_) => Err(ToolError::Timeout(timeout)),
        }
    }

    /// Execute one parsed call. Never fails: errors land in the result.
    pub async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ExecutionResult {
        let start = std::time::Instant::now();
        let outcome = self.invoke(&call.name, call.arguments.clone(), ctx).await;

        match outcome {
            Ok(output) => {
                tracing::debug!(
                    tool = %call.name,
                    call_id = %call.id,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Tool call succeeded"
                );
                ExecutionResult::success(call, output.result)
            }
            Err(e) => {
                let message = match e {
                    ToolError::Timeout(d) => {
                        format!("Tool '{}' timed out after {}s", call.name, d.as_secs())
                    }
                    other => other.to_string(),
                };
                tracing::warn!(tool = %call.name, call_id = %call.id, error = %message, "Tool call failed");
                ExecutionResult::failure(call, message)
            }
        }
    }

    /// Execute all calls concurrently. Results keep the input order and one
    /// failure never affects its siblings.
    pub async fn execute_many(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<ExecutionResult> {
        futures::future::join_all(calls.iter().map(|call| self.execute(call, ctx))).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry")
            .field("tools", &names)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::tools::tool::FnTool;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new().with_timeout(Duration::from_millis(200));
        registry.register(Arc::new(FnTool::new(
            "ok",
            "Succeeds after a short delay",
            serde_json::json!({"type": "object"}),
            |params, _ctx| async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(serde_json::json!({"echo": params}))
            },
        )));
        registry.register(Arc::new(FnTool::new(
            "fail",
            "Always fails immediately",
            serde_json::json!({"type": "object"}),
            |_params, _ctx| async move {
                Err(ToolError::ExecutionFailed("boom".to_string()))
            },
        )));
        registry.register(Arc::new(FnTool::new(
            "slow",
            "Never finishes in time",
            serde_json::json!({"type": "object"}),
            |_params, _ctx| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(serde_json::Value::Null)
            },
        )));
        registry.register(Arc::new(FnTool::new(
            "panics",
            "Panics",
            serde_json::json!({"type": "object"}),
            |_params, _ctx| async move {
                if true {
                    panic!("tool bug");
                }
                Ok(serde_json::Value::Null)
            },
        )));
        registry
    }

    #[tokio::test]
    async fn test_execute_many_keeps_order_and_isolates_failures() {
        let registry = registry();
        let calls = vec![
            ToolCall::new("a", "fail", serde_json::json!({})),
            ToolCall::new("b", "ok", serde_json::json!({"n": 1})),
        ];

        let results = registry.execute_many(&calls, &ToolContext::default()).await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].tool_call_id, "a");
        assert_eq!(
            results[0].error.as_deref(),
            Some("Execution failed: boom")
        );
        assert_eq!(results[1].tool_call_id, "b");
        assert_eq!(
            results[1].result,
            Some(serde_json::json!({"echo": {"n": 1}}))
        );
    }

    #[tokio::test]
    async fn test_execute_many_runs_concurrently() {
        let counter = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        {
            let counter = counter.clone();
            let peak = peak.clone();
            registry.register(Arc::new(FnTool::new(
                "track",
                "Tracks concurrency",
                serde_json::json!({"type": "object"}),
                move |_params, _ctx| {
                    let counter = counter.clone();
                    let peak = peak.clone();
                    async move {
                        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        counter.fetch_sub(1, Ordering::SeqCst);
                        Ok(serde_json::Value::Null)
                    }
                },
            )));
        }

        let calls: Vec<_> = (0..4)
            .map(|i| ToolCall::new(format!("c{}", i), "track", serde_json::json!({})))
            .collect();
        registry.execute_many(&calls, &ToolContext::default()).await;
        assert_eq!(peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_an_error_result() {
        let registry = registry();
        let result = registry
            .execute(
                &ToolCall::new("x", "missing", serde_json::json!({})),
                &ToolContext::default(),
            )
            .await;
        assert_eq!(result.error.as_deref(), Some("Tool not found: missing"));
        assert!(matches!(
            registry
                .invoke("missing", serde_json::json!({}), &ToolContext::default())
                .await,
            Err(ToolError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_and_panic_are_captured() {
        let registry = registry();
        let calls = vec![
            ToolCall::new("1", "slow", serde_json::json!({})),
            ToolCall::new("2", "panics", serde_json::json!({})),
            ToolCall::new("3", "ok", serde_json::json!({})),
        ];
        let results = registry.execute_many(&calls, &ToolContext::default()).await;
        assert!(results[0].error.as_deref().unwrap().contains("timed out"));
        assert!(results[1].error.as_deref().unwrap().contains("panicked"));
        assert!(!results[2].is_error());
    }

    #[test]
    fn test_definitions_sorted() {
        let names: Vec<_> = registry()
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec!["fail", "ok", "panics", "slow"]);
    }
}
