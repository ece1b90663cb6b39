//! Language-model client abstraction.
//!
//! The agent loop only needs one operation: send a message history to a
//! model and get one message back. [`LlmProvider`] captures that; the
//! concrete [`OllamaClient`] talks to an Ollama-compatible HTTP service.

mod ollama;

pub use ollama::OllamaClient;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::LlmError;

/// Default cap on concurrent requests in [`chat_many`].
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Name of the tool that produced this message (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Id of the call this message answers (tool messages only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// A tool result fed back to the model.
    pub fn tool(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            name: Some(name.into()),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

/// A chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    /// Provider-specific sampling options, passed through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            options: None,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }
}

/// A model backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name used in logs and errors.
    fn name(&self) -> &str;

    /// Send the request and return the model's reply.
    async fn chat(&self, request: ChatRequest) -> Result<ChatMessage, LlmError>;
}

/// Run `provider.chat` with a deadline, reporting expiry as [`LlmError::Timeout`].
pub async fn chat_with_timeout(
    provider: &dyn LlmProvider,
    request: ChatRequest,
    timeout: Duration,
) -> Result<ChatMessage, LlmError> {
    match tokio::time::timeout(timeout, provider.chat(request)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout {
            provider: provider.name().to_string(),
            timeout,
        }),
    }
}

/// Fan out independent requests with at most `max_concurrency` in flight.
///
/// Results come back in input order; one failure does not affect the others.
pub async fn chat_many(
    provider: Arc<dyn LlmProvider>,
    requests: Vec<ChatRequest>,
    max_concurrency: usize,
    timeout: Duration,
) -> Vec<Result<ChatMessage, LlmError>> {
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));

    let futures = requests.into_iter().map(|request| {
        let provider = provider.clone();
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| LlmError::RequestFailed {
                    provider: provider.name().to_string(),
                    reason: format!("concurrency limiter closed: {}", e),
                })?;
            chat_with_timeout(provider.as_ref(), request, timeout).await
        }
    });

    futures::future::join_all(futures).await
}


#[cfg(test)]
mod tests {
    use super::testing::{HangingProvider, ScriptedProvider};
    use super::*;

    #[test]
    fn test_tool_message_serialization() {
        let msg = ChatMessage::tool("call_1", "draft_read", "{}");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "tool");
        assert_eq!(json["tool_call_id"], "call_1");

        let user = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert!(user.get("name").is_none());
    }

    #[tokio::test]
    async fn test_chat_with_timeout_reports_timeout() {
        let result = chat_with_timeout(
            &HangingProvider,
            ChatRequest::new("m", vec![]),
            Duration::from_millis(20),
        )
        .await;
        assert!(result.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn test_chat_many_preserves_order_and_isolates_errors() {
        let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider::new(vec![
            Ok("first"),
            Err("boom"),
            Ok("third"),
        ]));
        let requests = (0..3)
            .map(|i| ChatRequest::new("m", vec![ChatMessage::user(format!("q{}", i))]))
            .collect();

        let results = chat_many(provider, requests, 1, Duration::from_secs(5)).await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().content, "first");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().content, "third");
    }
}
