//! ironloop: a local tool-execution runtime for LLM agents.
//!
//! Tools are served over a line-delimited JSON-RPC protocol on stdio. An
//! agent loop drives a local model through repeated tool rounds, with file
//! access confined to a sandbox and agents coordinating through a
//! file-backed message hub.

pub mod agent;
pub mod config;
pub mod error;
pub mod hub;
pub mod llm;
pub mod runtime;
pub mod sandbox;
pub mod tools;

pub use config::Config;
pub use error::{Error, Result};
pub use runtime::Runtime;
