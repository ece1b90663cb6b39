//! Line-delimited request dispatcher.
//!
//! Requests are read and answered strictly one at a time, so responses come
//! back in request order. Concurrency lives inside individual tools.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::ToolError;
use crate::tools::ToolRegistry;
use crate::tools::mcp::protocol::{
    CallToolParams, CallToolResult, INTERNAL_ERROR, INVALID_REQUEST, ListToolsResult, McpError,
    McpRequest, McpResponse, McpTool, initialize_result,
};
use crate::tools::tool::ToolContext;

/// Serves a read-only tool registry over the tool protocol.
#[derive(Debug, Clone)]
pub struct McpServer {
    registry: Arc<ToolRegistry>,
    name: String,
    version: String,
}

impl McpServer {
    /// Create a server for a fully populated registry.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Read requests from `reader` until EOF, writing one response line per request.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!(tools = self.registry.len(), "Tool server ready");
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf).await? == 0 {
                break;
            }
            let Some(response) = self.handle_frame(&buf).await else {
                continue;
            };

            let mut frame = serde_json::to_string(&response).unwrap_or_else(|e| {
                serde_json::json!({
                    "jsonrpc": "2.0",
                    "id": response.id,
                    "error": { "code": INTERNAL_ERROR, "message": format!("failed to encode response: {}", e) }
                })
                .to_string()
            });
            frame.push('\n');
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await?;
        }

        tracing::info!("Input closed, tool server stopping");
        Ok(())
    }

    /// Handle one raw input line. Returns `None` for blank lines and
    /// notifications.
    pub async fn handle_frame(&self, frame: &[u8]) -> Option<McpResponse> {
        let line = match std::str::from_utf8(frame) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Request frame is not valid UTF-8");
                return Some(McpResponse::error(
                    serde_json::Value::Null,
                    McpError::parse_error(e),
                ));
            }
        };
        if line.trim().is_empty() {
            return None;
        }
        self.handle_line(line.trim_end_matches(['\n', '\r'])).await
    }

    /// Handle one decoded frame. Returns `None` for notifications.
    pub async fn handle_line(&self, line: &str) -> Option<McpResponse> {
        let value: serde_json::Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "Malformed request frame");
                return Some(McpResponse::error(
                    serde_json::Value::Null,
                    McpError::parse_error(e),
                ));
            }
        };

        let id = value.get("id").cloned().unwrap_or(serde_json::Value::Null);
        match serde_json::from_value::<McpRequest>(value) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => Some(McpResponse::error(
                id,
                McpError::new(INVALID_REQUEST, format!("Invalid request: {}", e)),
            )),
        }
    }

    /// Dispatch a parsed request.
    pub async fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        if request.is_notification() {
            tracing::debug!(method = %request.method, "Notification received");
            return None;
        }
        let id = request.id.clone().unwrap_or(serde_json::Value::Null);

        let outcome = match request.method.as_str() {
            "initialize" => Ok(initialize_result(&self.name, &self.version)),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => Ok(self.list_tools()),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(McpError::method_not_found(other)),
        };

        Some(match outcome {
            Ok(result) => McpResponse::success(id, result),
            Err(error) => McpResponse::error(id, error),
        })
    }

    fn list_tools(&self) -> serde_json::Value {
        let result = ListToolsResult {
            tools: self
                .registry
                .definitions()
                .into_iter()
                .map(McpTool::from)
                .collect(),
        };
        serde_json::to_value(result).unwrap_or_default()
    }

    async fn call_tool(
        &self,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let params = params.ok_or_else(|| McpError::invalid_params("Missing params"))?;
        let params: CallToolParams = serde_json::from_value(params)
            .map_err(|e| McpError::invalid_params(format!("Invalid tools/call params: {}", e)))?;
        let arguments = params.arguments.unwrap_or_else(|| serde_json::json!({}));

        tracing::debug!(tool = %params.name, "tools/call");
        let result = match self
            .registry
            .invoke(&params.name, arguments, &ToolContext::default())
            .await
        {
            Ok(output) => CallToolResult::text(output.to_text()),
            Err(ToolError::NotFound(name)) => {
                return Err(McpError::invalid_params(format!("Tool not found: {}", name)));
            }
            Err(e) => {
                tracing::warn!(tool = %params.name, error = %e, "Tool call failed");
                CallToolResult::error(e.to_string())
            }
        };

        serde_json::to_value(result)
            .map_err(|e| McpError::new(INTERNAL_ERROR, format!("Failed to encode result: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::tools::mcp::protocol::{INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR};
    use crate::tools::tool::FnTool;

    fn server() -> McpServer {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FnTool::new(
            "echo",
            "Echo text",
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}}),
            |params, _ctx| async move {
                Ok(params
                    .get("text")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null))
            },
        )));
        registry.register(Arc::new(FnTool::new(
            "broken",
            "Always fails",
            serde_json::json!({"type": "object"}),
            |_params, _ctx| async move {
                Err(ToolError::InvalidParameters("missing 'path' parameter".to_string()))
            },
        )));
        McpServer::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn test_initialize() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], "ironloop");
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_tools_list() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":"a","method":"tools/list"}"#)
            .await
            .unwrap();
        assert_eq!(response.id, serde_json::json!("a"));
        let tools = response.result.unwrap()["tools"].clone();
        assert_eq!(tools.as_array().unwrap().len(), 2);
        assert_eq!(tools[0]["name"], "broken");
        assert!(tools[1]["inputSchema"].is_object());
    }

    #[tokio::test]
    async fn test_tool_failure_is_an_error_envelope() {
        let response = server()
            .handle_line(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"broken","arguments":{}}}"#,
            )
            .await
            .unwrap();
        assert!(response.error.is_none());
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert_eq!(
            result["content"][0]["text"],
            "Invalid parameters: missing 'path' parameter"
        );
    }

    #[tokio::test]
    async fn test_tool_success() {
        let response = server()
            .handle_line(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/call","params":{"name":"echo","arguments":{"text":"hi"}}}"#,
            )
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], false);
        assert_eq!(result["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_protocol_error() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"nope"}}"#)
            .await
            .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, INVALID_PARAMS);
        assert_eq!(error.message, "Tool not found: nope");
    }

    #[tokio::test]
    async fn test_unknown_method_and_parse_error() {
        let srv = server();
        let unknown = srv
            .handle_line(r#"{"jsonrpc":"2.0","id":5,"method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(unknown.error.unwrap().code, METHOD_NOT_FOUND);

        let garbage = srv.handle_line("{oops").await.unwrap();
        assert_eq!(garbage.error.unwrap().code, PARSE_ERROR);
        assert_eq!(garbage.id, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_missing_params() {
        let response = server()
            .handle_line(r#"{"jsonrpc":"2.0","id":6,"method":"tools/call"}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_notifications_get_no_response() {
        assert!(
            server()
                .handle_line(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_serve_answers_in_order() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"text":"x"}}}"#,
            "\n",
        );
        let mut output = Vec::new();
        server().serve(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_serve_survives_invalid_utf8() {
        let mut input = b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n".to_vec();
        input.extend_from_slice(b"\xff\xfe garbage\n");
        input.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\r\n");

        let mut output = Vec::new();
        server().serve(input.as_slice(), &mut output).await.unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], serde_json::Value::Null);
        assert_eq!(lines[1]["error"]["code"], PARSE_ERROR);
        assert_eq!(lines[2]["id"], 2);
        assert_eq!(lines[2]["result"], serde_json::json!({}));
    }
}
