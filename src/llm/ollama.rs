//! Ollama-compatible chat client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::LlmError;
use crate::llm::{ChatMessage, ChatRequest, LlmProvider, Role};

const PROVIDER: &str = "ollama";

/// Client for `POST <base_url>/api/chat`.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: Option<ResponseMessage>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    role: Option<Role>,
    #[serde(default)]
    content: String,
}

impl OllamaClient {
    /// Create a client. `timeout` bounds each whole request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
            timeout,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn request_body(request: &ChatRequest) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": request.messages.iter().map(|m| serde_json::json!({
                "role": m.role,
                "content": m.content,
            })).collect::<Vec<_>>(),
            "stream": false,
        });
        if let Some(ref options) = request.options {
            body["options"] = options.clone();
        }
        body
    }

    fn parse_response(body: &str) -> Result<ChatMessage, LlmError> {
        let parsed: ChatResponse =
            serde_json::from_str(body).map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: format!("malformed chat response: {}", e),
            })?;

        if let Some(error) = parsed.error {
            return Err(LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: error,
            });
        }

        let message = parsed.message.ok_or_else(|| LlmError::InvalidResponse {
            provider: PROVIDER.to_string(),
            reason: "response has no message".to_string(),
        })?;

        let mut reply = ChatMessage::assistant(message.content);
        if let Some(role) = message.role {
            reply.role = role;
        }
        Ok(reply)
    }
}

#[async_trait]
impl LlmProvider for OllamaClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChatMessage, LlmError> {
        tracing::debug!(model = %request.model, messages = request.messages.len(), "Sending chat request");

        let response = self
            .http_client
            .post(self.endpoint())
            .json(&Self::request_body(&request))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout {
                        provider: PROVIDER.to_string(),
                        timeout: self.timeout,
                    }
                } else {
                    LlmError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    provider: PROVIDER.to_string(),
                    timeout: self.timeout,
                }
            } else {
                LlmError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    reason: format!("failed to read response body: {}", e),
                }
            }
        })?;

        if !status.is_success() {
            return Err(LlmError::Http {
                provider: PROVIDER.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Self::parse_response(&body)
    }
}
