//! Line-delimited JSON-RPC tool protocol.
//!
//! Clients speak to the runtime over stdin/stdout: one JSON request per
//! line in, one JSON response per line out.

pub mod protocol;
mod server;

pub use protocol::{McpError, McpRequest, McpResponse, McpTool};
pub use server::McpServer;
