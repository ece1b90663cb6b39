//! Agent loop scenarios against the real tool catalog.

mod common;

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use ironloop::agent::{AgentLoopInput, Termination};
use ironloop::llm::Role;

use common::{CannedModel, runtime};

#[tokio::test]
async fn test_parallel_calls_in_one_reply() {
    let dir = TempDir::new().unwrap();
    let model = CannedModel::new(&[
        r#"```json
[{"name": "draft_write", "arguments": {"path": "a.md", "content": "A"}},
 {"name": "draft_write", "arguments": {"path": "b.md", "content": "B"}}]
```"#,
        "Both files written.",
    ]);
    let rt = runtime(&dir, model.clone());

    let result = rt.agent.run(AgentLoopInput::new("write two files")).await;
    assert_eq!(result.termination, Termination::FinalAnswer);
    assert_eq!(result.tool_calls_made, 2);
    assert!(result.execution_trace.iter().all(|r| !r.is_error()));
    assert_eq!(rt.sandbox.read("a.md").await.unwrap(), "A");
    assert_eq!(rt.sandbox.read("b.md").await.unwrap(), "B");

    let seen = model.seen.lock().unwrap();
    let tool_messages: Vec<_> = seen[1]
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);
}

#[tokio::test]
async fn test_repeated_reads_stop_as_loop() {
    let dir = TempDir::new().unwrap();
    let model = CannedModel::new(&[
        r#"<tool_call>{"name": "draft_list", "arguments": {}}</tool_call>"#,
    ]);
    let rt = runtime(&dir, model);

    let result = rt
        .agent
        .run(AgentLoopInput::new("look around").with_max_iterations(10))
        .await;
    assert_eq!(result.termination, Termination::InfiniteLoopDetected);
    assert!(result.iterations < 10);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_failing_tools_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let model = CannedModel::new(&[
        r#"<tool_call>{"name": "draft_read", "arguments": {"path": "missing-1.md"}}</tool_call>"#,
        r#"<tool_call>{"name": "draft_read", "arguments": {"path": "missing-2.md"}}</tool_call>"#,
        r#"<tool_call>{"name": "draft_read", "arguments": {"path": "missing-3.md"}}</tool_call>"#,
    ]);
    let rt = runtime(&dir, model);

    let result = rt
        .agent
        .run(AgentLoopInput::new("read things").with_max_iterations(10))
        .await;
    assert_eq!(result.termination, Termination::ConsecutiveErrorsExceeded);
    assert_eq!(result.iterations, 3);
    assert!(result.execution_trace.iter().all(|r| r.is_error()));
}

#[tokio::test]
async fn test_unknown_tool_is_fed_back_to_model() {
    let dir = TempDir::new().unwrap();
    let model = CannedModel::new(&[
        r#"<tool_call>{"name": "agent_loop", "arguments": {"prompt": "nested"}}</tool_call>"#,
        "Fine, answering directly.",
    ]);
    let rt = runtime(&dir, model.clone());

    let result = rt.agent.run(AgentLoopInput::new("go")).await;
    assert_eq!(result.termination, Termination::FinalAnswer);
    assert_eq!(
        result.execution_trace[0].error.as_deref(),
        Some("Tool not found: agent_loop")
    );

    let seen = model.seen.lock().unwrap();
    let fed_back = seen[1].messages.last().unwrap();
    assert_eq!(fed_back.role, Role::Tool);
    assert!(fed_back.content.contains("Tool not found"));
}

#[tokio::test]
async fn test_hub_questions_through_agent() {
    let dir = TempDir::new().unwrap();
    let model = CannedModel::new(&[
        r#"<tool_call>{"name": "ask_parent", "arguments": {"from": "worker", "to": "lead", "question": "Which format?"}}</tool_call>"#,
        "Asked the lead.",
    ]);
    let rt = runtime(&dir, model);

    let result = rt.agent.run(AgentLoopInput::new("coordinate")).await;
    assert_eq!(result.termination, Termination::FinalAnswer);

    let pending = rt.hub.get_pending_questions("lead").await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload.question, "Which format?");
}
