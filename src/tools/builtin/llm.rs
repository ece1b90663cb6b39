//! Direct model access: single generation and bounded fan-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ToolError;
use crate::llm::{
    ChatMessage, ChatRequest, DEFAULT_MAX_CONCURRENCY, LlmProvider, chat_many, chat_with_timeout,
};
use crate::tools::tool::{Tool, ToolContext, ToolOutput, optional_str, require_str};

/// Defaults applied to model tool calls.
#[derive(Debug, Clone)]
pub struct LlmToolSettings {
    pub default_model: String,
    pub timeout: Duration,
    pub max_concurrency: usize,
}

impl Default for LlmToolSettings {
    fn default() -> Self {
        Self {
            default_model: "llama3.1".to_string(),
            timeout: Duration::from_secs(120),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

/// Build a request from `{prompt, system?, model?, options?}`.
fn request_from(
    params: &serde_json::Value,
    settings: &LlmToolSettings,
) -> Result<ChatRequest, ToolError> {
    let prompt = require_str(params, "prompt")?;
    let model = optional_str(params, "model").unwrap_or(&settings.default_model);

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = optional_str(params, "system")
        && !system.is_empty()
    {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let request = ChatRequest::new(model, messages);
    Ok(match params.get("options") {
        Some(options) if options.is_object() => request.with_options(options.clone()),
        _ => request,
    })
}

/// Tool for a single completion.
pub struct LlmGenerateTool {
    llm: Arc<dyn LlmProvider>,
    settings: LlmToolSettings,
}

impl LlmGenerateTool {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: LlmToolSettings) -> Self {
        Self { llm, settings }
    }
}

#[async_trait]
impl Tool for LlmGenerateTool {
    fn name(&self) -> &str {
        "llm_generate"
    }

    fn description(&self) -> &str {
        "Generate a completion from the local language model."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "prompt": { "type": "string" },
                "system": { "type": "string", "description": "Optional system prompt" },
                "model": { "type": "string", "description": "Model name (default from config)" },
                "options": { "type": "object", "description": "Provider sampling options" }
            },
            "required": ["prompt"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let request = request_from(&params, &self.settings)?;
        let model = request.model.clone();

        let reply = chat_with_timeout(self.llm.as_ref(), request, self.settings.timeout).await?;

        Ok(ToolOutput::success(
            serde_json::json!({ "model": model, "response": reply.content }),
            start.elapsed(),
        ))
    }
}

/// Tool for many independent completions at bounded concurrency.
pub struct LlmBatchTool {
    llm: Arc<dyn LlmProvider>,
    settings: LlmToolSettings,
}

impl LlmBatchTool {
    pub fn new(llm: Arc<dyn LlmProvider>, settings: LlmToolSettings) -> Self {
        Self { llm, settings }
    }
}

#[async_trait]
impl Tool for LlmBatchTool {
    fn name(&self) -> &str {
        "llm_batch"
    }

    fn description(&self) -> &str {
        "Run several independent prompts against the local model concurrently. \
         Results keep the request order; one failure does not affect the others."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "requests": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "prompt": { "type": "string" },
                            "system": { "type": "string" },
                            "model": { "type": "string" },
                            "options": { "type": "object" }
                        },
                        "required": ["prompt"]
                    }
                },
                "max_concurrency": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "Requests in flight at once (default from config)"
                }
            },
            "required": ["requests"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let items = params
            .get("requests")
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                ToolError::InvalidParameters("missing 'requests' array".to_string())
            })?;

        let requests = items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                request_from(item, &self.settings).map_err(|e| {
                    ToolError::InvalidParameters(format!("requests[{}]: {}", i, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let max_concurrency = params
            .get("max_concurrency")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(self.settings.max_concurrency);

        let results = chat_many(
            self.llm.clone(),
            requests,
            max_concurrency,
            self.settings.timeout,
        )
        .await;

        let failed = results.iter().filter(|r| r.is_err()).count();
        let rendered: Vec<_> = results
            .into_iter()
            .map(|r| match r {
                Ok(reply) => serde_json::json!({ "response": reply.content }),
                Err(e) => serde_json::json!({ "error": e.to_string(), "timeout": e.is_timeout() }),
            })
            .collect();

        Ok(ToolOutput::success(
            serde_json::json!({
                "count": rendered.len(),
                "failed": failed,
                "results": rendered,
            }),
            start.elapsed(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::llm::testing::{HangingProvider, ScriptedProvider};

    #[tokio::test]
    async fn test_generate_uses_default_model_and_system() {
        let provider = Arc::new(ScriptedProvider::always("hello"));
        let tool = LlmGenerateTool::new(provider.clone(), LlmToolSettings::default());
        let out = tool
            .execute(
                serde_json::json!({"prompt": "hi", "system": "be nice"}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.result["response"], "hello");
        assert_eq!(out.result["model"], "llama3.1");

        let calls = provider.calls.lock().unwrap();
        assert_eq!(calls[0].messages.len(), 2);
    }

    #[tokio::test]
    async fn test_generate_timeout_is_reported() {
        let tool = LlmGenerateTool::new(
            Arc::new(HangingProvider),
            LlmToolSettings {
                timeout: Duration::from_millis(10),
                ..LlmToolSettings::default()
            },
        );
        let err = tool
            .execute(serde_json::json!({"prompt": "hi"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Llm(ref e) if e.is_timeout()));
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let provider = Arc::new(ScriptedProvider::new(vec![Ok("a"), Err("down"), Ok("c")]));
        let tool = LlmBatchTool::new(provider, LlmToolSettings::default());
        let out = tool
            .execute(
                serde_json::json!({
                    "requests": [{"prompt": "1"}, {"prompt": "2"}, {"prompt": "3"}],
                    "max_concurrency": 1
                }),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out.result["count"], 3);
        assert_eq!(out.result["failed"], 1);
        assert_eq!(out.result["results"][0]["response"], "a");
        assert!(out.result["results"][1]["error"].is_string());
        assert_eq!(out.result["results"][2]["response"], "c");
    }

    #[tokio::test]
    async fn test_batch_rejects_bad_item() {
        let tool = LlmBatchTool::new(
            Arc::new(ScriptedProvider::always("x")),
            LlmToolSettings::default(),
        );
        let err = tool
            .execute(
                serde_json::json!({"requests": [{"prompt": "ok"}, {"system": "no prompt"}]}),
                &ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("requests[1]"));
    }
}
