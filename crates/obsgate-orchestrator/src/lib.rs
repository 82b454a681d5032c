//! Agent Orchestrator (C7): the plan/act/observe/summarize state machine
//! that drives a single chat run, enforcing the token budget, persisting
//! checkpoints, and emitting a typed event sequence for the Stream Channel.

mod engine;
mod model;
mod redaction;
mod reducer;

pub use engine::{Orchestrator, RunEvent, DEFAULT_TOOL_FANOUT_MAX};
pub use model::{
    Command, Node, OrchestratorError, PendingToolCall, RunState, Signal, TokenBudget,
};
pub use redaction::{redact, RedactionReport, RedactionTier};
pub use reducer::{reduce, DEFAULT_MAX_TOOL_CALLS_PER_TURN};
