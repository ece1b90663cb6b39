//! Runtime configuration.
//!
//! Layers, lowest precedence first: built-in defaults, an optional TOML file,
//! `IRONLOOP_*` environment variables, then command-line flags (applied by
//! the binary).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{
    AgentLoopConfig, DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MAX_ITERATIONS,
    DEFAULT_MAX_REPEATED_CALLS,
};
use crate::error::ConfigError;
use crate::llm::DEFAULT_MAX_CONCURRENCY;
use crate::tools::builtin::LlmToolSettings;

/// Directory under the home directory holding runtime state.
const DATA_DIR: &str = ".ironloop";

/// Default config file name inside the data directory.
const CONFIG_FILE: &str = "config.toml";

/// Base directory for runtime state (`~/.ironloop`).
pub fn data_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(DATA_DIR)
}

/// Default config file path (`~/.ironloop/config.toml`).
pub fn default_config_path() -> PathBuf {
    data_dir().join(CONFIG_FILE)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            root: data_dir().join("sandbox"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub path: PathBuf,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            path: data_dir().join("hub.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub default_model: String,
    pub timeout_secs: u64,
    pub max_concurrency: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            default_model: "llama3.1".to_string(),
            timeout_secs: 120,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub max_repeated_calls: usize,
    pub max_consecutive_errors: usize,
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            max_repeated_calls: DEFAULT_MAX_REPEATED_CALLS,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
            tool_timeout_secs: 60,
        }
    }
}

/// Full runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub sandbox: SandboxConfig,
    pub hub: HubConfig,
    pub llm: LlmConfig,
    pub agent: AgentConfig,
}

impl Config {
    /// Load defaults, then `path` (or the default file if it exists), then the
    /// process environment.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file. Missing sections and keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&raw).map_err(|reason| ConfigError::Parse {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn from_toml(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Override fields from `IRONLOOP_*` variables returned by `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(root) = get("IRONLOOP_SANDBOX_ROOT") {
            self.sandbox.root = PathBuf::from(root);
        }
        if let Some(path) = get("IRONLOOP_HUB_PATH") {
            self.hub.path = PathBuf::from(path);
        }
        if let Some(url) = get("IRONLOOP_LLM_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = get("IRONLOOP_MODEL") {
            self.llm.default_model = model;
        }
        if let Some(raw) = get("IRONLOOP_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_number("IRONLOOP_LLM_TIMEOUT_SECS", &raw)?;
        }
        if let Some(raw) = get("IRONLOOP_LLM_CONCURRENCY") {
            self.llm.max_concurrency = parse_number("IRONLOOP_LLM_CONCURRENCY", &raw)?;
        }
        Ok(())
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if !self.llm.base_url.starts_with("http://") && !self.llm.base_url.starts_with("https://")
        {
            return Err(invalid("llm.base_url", "must start with http:// or https://"));
        }
        if self.llm.default_model.trim().is_empty() {
            return Err(invalid("llm.default_model", "must not be empty"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(invalid("llm.timeout_secs", "must be at least 1"));
        }
        if self.llm.max_concurrency == 0 {
            return Err(invalid("llm.max_concurrency", "must be at least 1"));
        }
        if self.agent.max_iterations == 0 {
            return Err(invalid("agent.max_iterations", "must be at least 1"));
        }
        if self.agent.max_repeated_calls == 0 {
            return Err(invalid("agent.max_repeated_calls", "must be at least 1"));
        }
        if self.agent.max_consecutive_errors == 0 {
            return Err(invalid("agent.max_consecutive_errors", "must be at least 1"));
        }
        if self.agent.tool_timeout_secs == 0 {
            return Err(invalid("agent.tool_timeout_secs", "must be at least 1"));
        }
        Ok(())
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.tool_timeout_secs)
    }

    /// Time one agent iteration may spend: a model call plus a tool round.
    pub fn agent_iteration_budget(&self) -> Duration {
        self.llm_timeout().saturating_add(self.tool_timeout())
    }

    pub fn agent_loop_config(&self) -> AgentLoopConfig {
        AgentLoopConfig {
            default_model: self.llm.default_model.clone(),
            max_repeated_calls: self.agent.max_repeated_calls,
            max_consecutive_errors: self.agent.max_consecutive_errors,
            llm_timeout: self.llm_timeout(),
        }
    }

    pub fn llm_tool_settings(&self) -> LlmToolSettings {
        LlmToolSettings {
            default_model: self.llm.default_model.clone(),
            timeout: self.llm_timeout(),
            max_concurrency: self.llm.max_concurrency,
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key: key.to_string(),
        reason: format!("'{}' is not a valid number: {}", raw, e),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.llm.base_url, "http://localhost:11434");
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.max_repeated_calls, 2);
        assert_eq!(config.agent.max_consecutive_errors, 3);
        assert!(config.hub.path.ends_with(".ironloop/hub.json"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ironloop.toml");
        std::fs::write(
            &path,
            "[llm]\ndefault_model = \"qwen2.5\"\n\n[agent]\nmax_iterations = 4\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.llm.default_model, "qwen2.5");
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.tool_timeout_secs, 60);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let err = Config::load(Some(&missing)).unwrap_err();
        match err {
            ConfigError::Read { path, .. } => assert_eq!(path, missing),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[llm\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("IRONLOOP_MODEL", "mistral"),
            ("IRONLOOP_LLM_URL", "http://gpu-box:11434"),
            ("IRONLOOP_LLM_CONCURRENCY", "8"),
            ("IRONLOOP_HUB_PATH", ""),
        ]);
        let mut config = Config::default();
        let default_hub = config.hub.path.clone();
        config
            .apply_env(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.llm.default_model, "mistral");
        assert_eq!(config.llm.base_url, "http://gpu-box:11434");
        assert_eq!(config.llm.max_concurrency, 8);
        assert_eq!(config.hub.path, default_hub);
    }

    #[test]
    fn test_bad_env_number() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "IRONLOOP_LLM_TIMEOUT_SECS").then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "IRONLOOP_LLM_TIMEOUT_SECS"));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.llm.max_concurrency = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref key, .. }) if key == "llm.max_concurrency"
        ));

        let mut config = Config::default();
        config.llm.base_url = "localhost:11434".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_derived_settings() {
        let config = Config::default();
        assert_eq!(config.agent_loop_config().llm_timeout, Duration::from_secs(120));
        assert_eq!(config.llm_tool_settings().max_concurrency, 4);
        assert_eq!(config.agent_iteration_budget(), Duration::from_secs(180));
    }

    #[test]
    fn test_iteration_budget_saturates() {
        let mut config = Config::default();
        config.llm.timeout_secs = u64::MAX;
        assert_eq!(config.agent_iteration_budget(), Duration::MAX);
    }
}
