use obsgate_providers::{ChatMessage, ProposedToolCall, TokenUsage};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `spec.md` §4.7: a state machine with six nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Plan,
    Act,
    Observe,
    Summarize,
    Done,
    Failed,
}

/// Per-run token accounting (`spec.md` §3 TokenBudget). `should_summarize`
/// is recomputed on every [`TokenBudget::record`] call, never set directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudget {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub budget_max: u64,
    pub budget_remaining: u64,
    pub model: String,
    pub should_summarize: bool,
}

impl TokenBudget {
    pub fn new(budget_max: u64, model: impl Into<String>) -> Self {
        Self {
            prompt_tokens: 0,
            completion_tokens: 0,
            total_tokens: 0,
            budget_max,
            budget_remaining: budget_max,
            model: model.into(),
            should_summarize: false,
        }
    }

    pub fn record(&mut self, usage: &TokenUsage) {
        self.prompt_tokens += usage.prompt_tokens;
        self.completion_tokens += usage.completion_tokens;
        self.total_tokens += usage.prompt_tokens + usage.completion_tokens;
        self.budget_remaining = self.budget_max.saturating_sub(self.total_tokens);
        // should_summarize iff total_tokens >= 0.8 * budget_max (spec.md §4.7).
        self.should_summarize = self.total_tokens * 10 >= self.budget_max * 8;
    }

    /// Whether a just-attempted summarization was not enough to continue:
    /// still over `0.9 * budget_max` (spec.md §4.7 Token budget).
    pub fn exhausted_after_summarize(&self) -> bool {
        self.total_tokens * 10 >= self.budget_max * 9
    }
}

/// Full state blob a [`Checkpoint`](obsgate_store::Checkpoint) persists
/// (`spec.md` §4.7 Checkpointing: "messages, pending tool calls, token
/// budget, scratch").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub session_id: String,
    pub node: Node,
    pub messages: Vec<ChatMessage>,
    pub pending_tool_calls: Vec<PendingToolCall>,
    pub token_budget: TokenBudget,
    pub tool_calls_this_turn: u32,
    pub scratch: Value,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingToolCall {
    pub tool_name: String,
    pub arguments: Value,
}

impl From<&ProposedToolCall> for PendingToolCall {
    fn from(call: &ProposedToolCall) -> Self {
        Self {
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
        }
    }
}

impl RunState {
    pub fn new(run_id: impl Into<String>, session_id: impl Into<String>, token_budget: TokenBudget) -> Self {
        Self {
            run_id: run_id.into(),
            session_id: session_id.into(),
            node: Node::Plan,
            messages: Vec::new(),
            pending_tool_calls: Vec::new(),
            token_budget,
            tool_calls_this_turn: 0,
            scratch: Value::Null,
            cancelled: false,
        }
    }
}

/// Inputs to the pure reducer (`spec.md` §4.7 Transitions).
#[derive(Debug, Clone)]
pub enum Signal {
    PlanProposedTools(Vec<ProposedToolCall>),
    PlanConcludedAnswer(String),
    ToolReturned,
    BudgetOverrun,
    SummarizeSucceeded,
    SummarizeFailed,
    Cancelled,
    UnhandledError(String),
}

/// Side effects the driver must perform after a transition, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    PersistCheckpoint,
    RunTool(PendingToolCall),
    RequestSummarization,
    EmitDone,
    EmitFailed(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("budget exhausted: summarization did not reduce usage below 0.9 * budget_max")]
    BudgetExhausted,
    #[error("run cancelled")]
    Cancelled,
    #[error("unhandled error: {0}")]
    Unhandled(String),
}
