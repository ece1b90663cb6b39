//! Startup wiring: builds the shared services and the tool catalog.

use std::sync::Arc;

use crate::agent::AgentLoop;
use crate::config::Config;
use crate::error::Error;
use crate::hub::MessageHub;
use crate::llm::{LlmProvider, OllamaClient};
use crate::sandbox::Sandbox;
use crate::tools::ToolRegistry;
use crate::tools::builtin::{
    AgentLoopTool, register_draft_tools, register_hub_tools, register_llm_tools,
};

/// Everything a server or a one-shot run needs.
pub struct Runtime {
    /// Full catalog served to clients, including `agent_loop`.
    pub registry: Arc<ToolRegistry>,
    /// Agent loop over the base catalog (everything but `agent_loop`).
    pub agent: Arc<AgentLoop>,
    pub sandbox: Arc<Sandbox>,
    pub hub: Arc<MessageHub>,
}

impl Runtime {
    /// Build with an HTTP model client from `config.llm`.
    pub fn from_config(config: &Config) -> Result<Self, Error> {
        let llm = OllamaClient::new(config.llm.base_url.clone(), config.llm_timeout())?;
        Self::with_provider(config, Arc::new(llm))
    }

    /// Build around an existing model provider.
    pub fn with_provider(config: &Config, llm: Arc<dyn LlmProvider>) -> Result<Self, Error> {
        let sandbox = Arc::new(Sandbox::new(&config.sandbox.root)?);
        let hub = Arc::new(MessageHub::new(config.hub.path.clone()));

        let mut base = ToolRegistry::new().with_timeout(config.tool_timeout());
        register_draft_tools(&mut base, sandbox.clone());
        register_hub_tools(&mut base, hub.clone());
        register_llm_tools(&mut base, llm.clone(), config.llm_tool_settings());
        let base = Arc::new(base);

        let agent = Arc::new(AgentLoop::new(llm, base.clone(), config.agent_loop_config()));

        let mut full = ToolRegistry::new().with_timeout(config.tool_timeout());
        full.extend_from(&base);
        full.register(Arc::new(AgentLoopTool::new(
            agent.clone(),
            config.agent_iteration_budget(),
        )));

        tracing::debug!(
            sandbox = %sandbox.root().display(),
            hub = %hub.path().display(),
            tools = full.len(),
            "Runtime assembled"
        );

        Ok(Self {
            registry: Arc::new(full),
            agent,
            sandbox,
            hub,
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::llm::testing::ScriptedProvider;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.sandbox.root = dir.path().join("sandbox");
        config.hub.path = dir.path().join("hub.json");
        config
    }

    #[test]
    fn test_catalog() {
        let dir = TempDir::new().unwrap();
        let runtime =
            Runtime::with_provider(&config(&dir), Arc::new(ScriptedProvider::always("x"))).unwrap();

        let names: Vec<_> = runtime
            .registry
            .definitions()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "agent_loop",
                "ask_parent",
                "check_answer",
                "draft_list",
                "draft_patch",
                "draft_read",
                "draft_write",
                "get_pending_questions",
                "hub_connect",
                "hub_heartbeat",
                "hub_receive",
                "hub_send",
                "hub_status",
                "llm_batch",
                "llm_generate",
                "reply",
            ]
        );
    }

    #[test]
    fn test_agent_cannot_recurse() {
        let dir = TempDir::new().unwrap();
        let runtime =
            Runtime::with_provider(&config(&dir), Arc::new(ScriptedProvider::always("x"))).unwrap();
        assert!(runtime.registry.has("agent_loop"));
        assert!(!runtime.agent.registry().has("agent_loop"));
        assert_eq!(runtime.agent.registry().len(), runtime.registry.len() - 1);
    }
}
