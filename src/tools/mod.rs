//! Tool layer: the tool trait, the call parser, the executor, and the
//! protocol server that exposes them.

pub mod builtin;
pub mod mcp;
pub mod parser;
mod registry;
pub mod tool;

pub use parser::parse_tool_calls;
pub use registry::{DEFAULT_TOOL_TIMEOUT, ToolRegistry};
pub use tool::{ExecutionResult, FnTool, Tool, ToolCall, ToolContext, ToolDefinition, ToolOutput};
