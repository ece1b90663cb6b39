//! Message hub tools: agent registration, messaging, liveness, and
//! parent/child questions.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ToolError;
use crate::hub::{MessageHub, NewMessage};
use crate::tools::tool::{Tool, ToolContext, ToolOutput, optional_str, require_str};

/// Parse an optional RFC 3339 timestamp argument.
fn optional_timestamp(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<DateTime<Utc>>, ToolError> {
    let Some(raw) = optional_str(params, key) else {
        return Ok(None);
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|t| Some(t.with_timezone(&Utc)))
        .map_err(|e| {
            ToolError::InvalidParameters(format!("'{}' is not an RFC 3339 timestamp: {}", key, e))
        })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, ToolError> {
    serde_json::to_value(value)
        .map_err(|e| ToolError::ExecutionFailed(format!("failed to encode result: {}", e)))
}

macro_rules! hub_tool {
    ($(#[$meta:meta])* $ty:ident) => {
        $(#[$meta])*
        pub struct $ty {
            hub: Arc<MessageHub>,
        }

        impl $ty {
            pub fn new(hub: Arc<MessageHub>) -> Self {
                Self { hub }
            }
        }
    };
}

hub_tool!(
    /// Register an agent with the hub.
    HubConnectTool
);
hub_tool!(
    /// Append a message to the hub log.
    HubSendTool
);
hub_tool!(
    /// Fetch messages addressed to an agent.
    HubReceiveTool
);
hub_tool!(
    /// Record agent liveness and progress.
    HubHeartbeatTool
);
hub_tool!(
    /// Report connected agents and their last heartbeats.
    HubStatusTool
);
hub_tool!(
    /// Post a question to a parent agent.
    AskParentTool
);
hub_tool!(
    /// Answer a pending question.
    ReplyTool
);
hub_tool!(
    /// Poll a question for its answer.
    CheckAnswerTool
);
hub_tool!(
    /// List unanswered questions addressed to an agent.
    PendingQuestionsTool
);

#[async_trait]
impl Tool for HubConnectTool {
    fn name(&self) -> &str {
        "hub_connect"
    }

    fn description(&self) -> &str {
        "Register an agent with the message hub. Registering twice is harmless."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_id": { "type": "string", "description": "Agent identifier" }
            },
            "required": ["agent_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let agent_id = require_str(&params, "agent_id")?;
        let registered = self.hub.connect(agent_id).await?;
        Ok(ToolOutput::success(
            serde_json::json!({ "agent_id": agent_id, "newly_registered": registered }),
            start.elapsed(),
        ))
    }
}

#[async_trait]
impl Tool for HubSendTool {
    fn name(&self) -> &str {
        "hub_send"
    }

    fn description(&self) -> &str {
        "Send a message to another agent through the hub. The hub assigns an id and \
         timestamp unless provided."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "from": { "type": "string" },
                "to": { "type": "string" },
                "type": { "type": "string", "description": "Message type, e.g. 'task' or 'result'" },
                "payload": { "description": "Arbitrary JSON payload" },
                "id": { "type": "string" },
                "timestamp": { "type": "string", "format": "date-time" }
            },
            "required": ["from", "to", "type"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let message = NewMessage {
            id: optional_str(&params, "id").map(str::to_string),
            kind: require_str(&params, "type")?.to_string(),
            from: require_str(&params, "from")?.to_string(),
            to: require_str(&params, "to")?.to_string(),
            payload: params
                .get("payload")
                .cloned()
                .unwrap_or(serde_json::Value::Null),
            timestamp: optional_timestamp(&params, "timestamp")?,
        };
        let sent = self.hub.send(message).await?;
        Ok(ToolOutput::success(to_json(&sent)?, start.elapsed()))
    }
}

#[async_trait]
impl Tool for HubReceiveTool {
    fn name(&self) -> &str {
        "hub_receive"
    }

    fn description(&self) -> &str {
        "Fetch messages addressed to an agent, optionally only those newer than 'since'."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_id": { "type": "string" },
                "since": { "type": "string", "format": "date-time" }
            },
            "required": ["agent_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let agent_id = require_str(&params, "agent_id")?;
        let since = optional_timestamp(&params, "since")?;
        let messages = self.hub.receive(agent_id, since).await?;
        Ok(ToolOutput::success(
            serde_json::json!({
                "agent_id": agent_id,
                "count": messages.len(),
                "messages": to_json(&messages)?,
            }),
            start.elapsed(),
        ))
    }

    fn read_only(&self) -> bool {
        true
    }
}

#[async_trait]
impl Tool for HubHeartbeatTool {
    fn name(&self) -> &str {
        "hub_heartbeat"
    }

    fn description(&self) -> &str {
        "Report that an agent is alive, with optional progress details."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_id": { "type": "string" },
                "progress": { "description": "Arbitrary JSON progress report" },
                "timestamp": { "type": "string", "format": "date-time" }
            },
            "required": ["agent_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let agent_id = require_str(&params, "agent_id")?;
        let progress = params
            .get("progress")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        let timestamp = optional_timestamp(&params, "timestamp")?;
        let heartbeat = self.hub.heartbeat(agent_id, progress, timestamp).await?;
        Ok(ToolOutput::success(to_json(&heartbeat)?, start.elapsed()))
    }
}

#[async_trait]
impl Tool for HubStatusTool {
    fn name(&self) -> &str {
        "hub_status"
    }

    fn description(&self) -> &str {
        "Show registered agents, their last heartbeats, and the message count."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(
        &self,
        _params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let state = self.hub.snapshot().await?;
        Ok(ToolOutput::success(
            serde_json::json!({
                "agents": state.agents,
                "heartbeats": to_json(&state.heartbeats)?,
                "message_count": state.messages.len(),
            }),
            start.elapsed(),
        ))
    }

    fn read_only(&self) -> bool {
        true
    }
}

#[async_trait]
impl Tool for AskParentTool {
    fn name(&self) -> &str {
        "ask_parent"
    }

    fn description(&self) -> &str {
        "Ask the parent agent a question. Returns a question id to poll with check_answer."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "from": { "type": "string", "description": "Asking agent" },
                "to": { "type": "string", "description": "Parent agent" },
                "question": { "type": "string" },
                "context": { "type": "string" }
            },
            "required": ["from", "to", "question"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let from = require_str(&params, "from")?;
        let to = require_str(&params, "to")?;
        let question = require_str(&params, "question")?;
        if question.trim().is_empty() {
            return Err(ToolError::InvalidParameters(
                "question cannot be empty".to_string(),
            ));
        }
        let context = optional_str(&params, "context").map(str::to_string);

        let view = self.hub.ask_parent(from, to, question, context).await?;
        Ok(ToolOutput::success(to_json(&view)?, start.elapsed()))
    }
}

#[async_trait]
impl Tool for ReplyTool {
    fn name(&self) -> &str {
        "reply"
    }

    fn description(&self) -> &str {
        "Answer a pending question. The asker is notified with an 'answer' message."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question_id": { "type": "string" },
                "from": { "type": "string", "description": "Answering agent" },
                "answer": { "type": "string" }
            },
            "required": ["question_id", "from", "answer"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let question_id = require_str(&params, "question_id")?;
        let from = require_str(&params, "from")?;
        let answer = require_str(&params, "answer")?;

        let view = self.hub.reply(question_id, from, answer).await?;
        Ok(ToolOutput::success(to_json(&view)?, start.elapsed()))
    }
}

#[async_trait]
impl Tool for CheckAnswerTool {
    fn name(&self) -> &str {
        "check_answer"
    }

    fn description(&self) -> &str {
        "Check whether a question has been answered. An answer is reported as ANSWERED on \
         first read and RETRIEVED afterwards."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question_id": { "type": "string" }
            },
            "required": ["question_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let question_id = require_str(&params, "question_id")?;
        let view = self.hub.check_answer(question_id).await?;
        Ok(ToolOutput::success(to_json(&view)?, start.elapsed()))
    }
}

#[async_trait]
impl Tool for PendingQuestionsTool {
    fn name(&self) -> &str {
        "get_pending_questions"
    }

    fn description(&self) -> &str {
        "List questions addressed to an agent that still await an answer."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "agent_id": { "type": "string" }
            },
            "required": ["agent_id"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let start = std::time::Instant::now();
        let agent_id = require_str(&params, "agent_id")?;
        let questions = self.hub.get_pending_questions(agent_id).await?;
        Ok(ToolOutput::success(
            serde_json::json!({
                "agent_id": agent_id,
                "count": questions.len(),
                "questions": to_json(&questions)?,
            }),
            start.elapsed(),
        ))
    }
}
