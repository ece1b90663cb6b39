//! Repetition and failure-rate guards for the agent loop.

use crate::tools::tool::ToolCall;

/// Default number of identical rounds tolerated after the first.
pub const DEFAULT_MAX_REPEATED_CALLS: usize = 2;
/// Default number of consecutive failed iterations before giving up.
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: usize = 3;

/// Tracks consecutive identical call sets and consecutive failed iterations.
#[derive(Debug, Clone)]
pub struct LoopGuard {
    max_repeats: usize,
    max_consecutive_errors: usize,
    last_calls: Option<Vec<String>>,
    repeats: usize,
    consecutive_errors: usize,
}

impl LoopGuard {
    pub fn new(max_repeats: usize, max_consecutive_errors: usize) -> Self {
        Self {
            max_repeats: max_repeats.max(1),
            max_consecutive_errors: max_consecutive_errors.max(1),
            last_calls: None,
            repeats: 0,
            consecutive_errors: 0,
        }
    }

    /// Record this round's calls. Returns `true` once the same set of calls
    /// (name + arguments, order-insensitive) has been repeated `max_repeats`
    /// times in a row.
    pub fn observe_calls(&mut self, calls: &[ToolCall]) -> bool {
        let mut signature: Vec<String> = calls.iter().map(ToolCall::signature).collect();
        signature.sort();

        if self.last_calls.as_ref() == Some(&signature) {
            self.repeats += 1;
        } else {
            self.repeats = 0;
            self.last_calls = Some(signature);
        }
        self.repeats >= self.max_repeats
    }

    /// Record whether this iteration failed. Returns `true` once
    /// `max_consecutive_errors` failed iterations happened in a row.
    pub fn observe_outcome(&mut self, failed: bool) -> bool {
        if failed {
            self.consecutive_errors += 1;
        } else {
            self.consecutive_errors = 0;
        }
        self.consecutive_errors >= self.max_consecutive_errors
    }

    pub fn repeats(&self) -> usize {
        self.repeats
    }

    pub fn consecutive_errors(&self) -> usize {
        self.consecutive_errors
    }
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REPEATED_CALLS, DEFAULT_MAX_CONSECUTIVE_ERRORS)
    }
}
