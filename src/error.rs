//! Error types for ironloop.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Hub error: {0}")]
    Hub(#[from] HubError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// Sandbox path and file errors.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Path escapes sandbox root: {path}")]
    PathEscape { path: String },

    #[error("Invalid path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("File not found: {path}")]
    NotFound { path: String },

    #[error("Invalid patch for {path}: {reason}")]
    InvalidPatch { path: String, reason: String },

    #[error("Atomic write to {path} failed: {reason}")]
    AtomicWrite { path: PathBuf, reason: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Message hub persistence and protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Hub document {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Failed to persist hub document {path}: {reason}")]
    Persist { path: PathBuf, reason: String },

    #[error("Question not found: {id}")]
    QuestionNotFound { id: String },

    #[error("Question {id} is {status}, expected {expected}")]
    InvalidQuestionState {
        id: String,
        status: String,
        expected: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Language-model client errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Request to {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Request to {provider} failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("{provider} returned HTTP {status}: {body}")]
    Http {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },
}

impl LlmError {
    /// Whether this failure was a deadline expiry rather than a service error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Hub(#[from] HubError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
