//! Built-in tools served by the runtime.

mod agent;
mod draft;
mod hub;
mod llm;

pub use agent::AgentLoopTool;
pub use draft::{DraftListTool, DraftPatchTool, DraftReadTool, DraftWriteTool};
pub use hub::{
    AskParentTool, CheckAnswerTool, HubConnectTool, HubHeartbeatTool, HubReceiveTool,
    HubSendTool, HubStatusTool, PendingQuestionsTool, ReplyTool,
};
pub use llm::{LlmBatchTool, LlmGenerateTool, LlmToolSettings};

use std::sync::Arc;

use crate::hub::MessageHub;
use crate::llm::LlmProvider;
use crate::sandbox::Sandbox;
use crate::tools::ToolRegistry;

/// Register the draft tools.
pub fn register_draft_tools(registry: &mut ToolRegistry, sandbox: Arc<Sandbox>) {
    registry.register(Arc::new(DraftReadTool::new(sandbox.clone())));
    registry.register(Arc::new(DraftWriteTool::new(sandbox.clone())));
    registry.register(Arc::new(DraftListTool::new(sandbox.clone())));
    registry.register(Arc::new(DraftPatchTool::new(sandbox)));
}

/// Register the hub and question tools.
pub fn register_hub_tools(registry: &mut ToolRegistry, hub: Arc<MessageHub>) {
    registry.register(Arc::new(HubConnectTool::new(hub.clone())));
    registry.register(Arc::new(HubSendTool::new(hub.clone())));
    registry.register(Arc::new(HubReceiveTool::new(hub.clone())));
    registry.register(Arc::new(HubHeartbeatTool::new(hub.clone())));
    registry.register(Arc::new(HubStatusTool::new(hub.clone())));
    registry.register(Arc::new(AskParentTool::new(hub.clone())));
    registry.register(Arc::new(ReplyTool::new(hub.clone())));
    registry.register(Arc::new(CheckAnswerTool::new(hub.clone())));
    registry.register(Arc::new(PendingQuestionsTool::new(hub)));
}

/// Register the direct model tools.
pub fn register_llm_tools(
    registry: &mut ToolRegistry,
    llm: Arc<dyn LlmProvider>,
    settings: LlmToolSettings,
) {
    registry.register(Arc::new(LlmGenerateTool::new(llm.clone(), settings.clone())));
    registry.register(Arc::new(LlmBatchTool::new(llm, settings)));
}
