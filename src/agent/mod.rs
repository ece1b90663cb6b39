//! Core agent logic.
//!
//! The agent loop prompts a model, executes the tool calls it emits, and
//! feeds the results back until the model answers or a guard trips:
//! - Iteration cap
//! - Repeated identical calls
//! - Consecutive failed iterations

mod agent_loop;
mod guard;

pub use agent_loop::{
    AgentLoop, AgentLoopConfig, AgentLoopInput, AgentLoopResult, DEFAULT_MAX_ITERATIONS,
    MAX_ITERATIONS_RESPONSE, Termination,
};
pub use guard::{DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_MAX_REPEATED_CALLS, LoopGuard};
