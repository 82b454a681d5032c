use std::sync::Arc;

use obsgate_providers::{ChatMessage, PlanDecision, Provider, ProviderError};
use obsgate_store::{MessageMetadata, MessageRole, SessionStore, StoreError};
use obsgate_tools::ToolRegistry;
use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::model::{Command, Node, OrchestratorError, RunState, Signal, TokenBudget};
use crate::reducer::{reduce, DEFAULT_MAX_TOOL_CALLS_PER_TURN};
use crate::redaction::redact;

/// Default bound on concurrent tool calls per turn (`spec.md` §5, fan-out `F`).
pub const DEFAULT_TOOL_FANOUT_MAX: usize = 4;

/// Events streamed out of a run for the Stream Channel (C8) to frame as SSE.
/// Deliberately a data type, not a behavior — the orchestrator never touches
/// an SSE socket directly.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunEvent {
    Token { text: String, sequence: u64 },
    ToolCallStart { tool_name: String, sequence: u64 },
    ToolCallEnd { tool_name: String, status: String, sequence: u64 },
    Citation { log_id: String, sequence: u64 },
    Checkpoint { node: String, sequence: u64 },
    TokenBudget { budget: TokenBudget, sequence: u64 },
    Error { reason: String, sequence: u64 },
    Done { sequence: u64 },
}

pub struct Orchestrator {
    provider: Arc<dyn Provider>,
    tools: ToolRegistry,
    store: SessionStore,
    max_tool_calls_per_turn: u32,
    tool_fanout_max: usize,
}

impl Orchestrator {
    pub fn new(provider: Arc<dyn Provider>, tools: ToolRegistry, store: SessionStore) -> Self {
        Self {
            provider,
            tools,
            store,
            max_tool_calls_per_turn: DEFAULT_MAX_TOOL_CALLS_PER_TURN,
            tool_fanout_max: DEFAULT_TOOL_FANOUT_MAX,
        }
    }

    pub fn with_max_tool_calls_per_turn(mut self, n: u32) -> Self {
        self.max_tool_calls_per_turn = n;
        self
    }

    pub fn with_tool_fanout_max(mut self, f: usize) -> Self {
        self.tool_fanout_max = f;
        self
    }

    /// Drives one run to completion, emitting [`RunEvent`]s on `events` as it
    /// goes. Returns once the run reaches `done` or `failed`
    /// (`spec.md` §4.7).
    pub async fn run(
        &self,
        run_id: &str,
        session_id: &str,
        budget_max: u64,
        model: &str,
        first_message: &str,
        events: mpsc::Sender<RunEvent>,
        cancel: CancellationToken,
    ) -> Result<(), OrchestratorError> {
        let mut state = RunState::new(run_id, session_id, TokenBudget::new(budget_max, model));
        state.messages.push(ChatMessage {
            role: "user".to_string(),
            content: first_message.to_string(),
        });

        let mut sequence: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                let (next, commands) = reduce(&state, Signal::Cancelled, self.max_tool_calls_per_turn);
                state = next;
                self.run_commands(&state, commands, &events, &mut sequence).await;
                return Err(OrchestratorError::Cancelled);
            }

            match state.node {
                Node::Plan => {
                    let signal = match self.plan(&mut state, cancel.clone()).await {
                        Ok(signal) => signal,
                        Err(reason) => Signal::UnhandledError(reason),
                    };
                    self.emit_token_budget(&state, &events, &mut sequence).await;
                    let (next, commands) = reduce(&state, signal, self.max_tool_calls_per_turn);
                    state = next;
                    self.run_commands(&state, commands, &events, &mut sequence).await;
                }
                Node::Act => {
                    self.act(&mut state, &events, &mut sequence).await;
                    let (next, commands) = reduce(&state, Signal::ToolReturned, self.max_tool_calls_per_turn);
                    state = next;
                    self.run_commands(&state, commands, &events, &mut sequence).await;
                }
                Node::Observe => {
                    let (next, commands) = reduce(&state, Signal::ToolReturned, self.max_tool_calls_per_turn);
                    state = next;
                    self.run_commands(&state, commands, &events, &mut sequence).await;
                }
                Node::Summarize => {
                    let signal = self.summarize(&mut state).await;
                    let (next, commands) = reduce(&state, signal, self.max_tool_calls_per_turn);
                    state = next;
                    self.run_commands(&state, commands, &events, &mut sequence).await;
                }
                Node::Done => return Ok(()),
                Node::Failed => return Err(OrchestratorError::Unhandled("run failed".to_string())),
            }
        }
    }

    async fn plan(&self, state: &mut RunState, cancel: CancellationToken) -> Result<Signal, String> {
        let redacted: Vec<ChatMessage> = state
            .messages
            .iter()
            .map(|m| {
                let (content, report) = redact(&m.content);
                if report.any() {
                    tracing::info!(
                        high = report.high_matches,
                        moderate = report.moderate_matches,
                        "redacted message before crossing the LLM boundary"
                    );
                }
                ChatMessage { role: m.role.clone(), content }
            })
            .collect();

        match self.provider.plan(&redacted, cancel).await {
            Ok((decision, usage)) => {
                state.token_budget.record(&usage);
                if state.token_budget.should_summarize {
                    return Ok(Signal::BudgetOverrun);
                }
                match decision {
                    PlanDecision::CallTools(calls) => Ok(Signal::PlanProposedTools(calls)),
                    PlanDecision::Answer(text) => {
                        state.messages.push(ChatMessage { role: "assistant".to_string(), content: text.clone() });
                        Ok(Signal::PlanConcludedAnswer(text))
                    }
                }
            }
            Err(ProviderError::Cancelled) => Err("cancelled".to_string()),
            Err(err) => Err(err.to_string()),
        }
    }

    /// Runs every pending tool call concurrently, capped at `tool_fanout_max`
    /// in-flight at once (`spec.md` §5: "caps fan-out at F, default 4").
    async fn act(&self, state: &mut RunState, events: &mpsc::Sender<RunEvent>, sequence: &mut u64) {
        let semaphore = Arc::new(Semaphore::new(self.tool_fanout_max));
        let calls = std::mem::take(&mut state.pending_tool_calls);
        let mut handles = Vec::with_capacity(calls.len());

        for call in calls {
            let permit = semaphore.clone();
            let tools = self.tools.clone();
            let session_id = state.session_id.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore never closed");
                let result = tools.invoke(&session_id, &call.tool_name, call.arguments.clone()).await;
                (call, result)
            }));
        }

        for handle in handles {
            let (call, result) = match handle.await {
                Ok(pair) => pair,
                Err(join_err) => {
                    tracing::error!(%join_err, "tool task panicked");
                    continue;
                }
            };
            self.emit(events, sequence, RunEvent::ToolCallStart { tool_name: call.tool_name.clone(), sequence: *sequence }).await;
            let status = match result.status {
                obsgate_tools::ToolResultStatus::Completed => "completed",
                obsgate_tools::ToolResultStatus::Error => "error",
            };
            state.messages.push(ChatMessage {
                role: "tool".to_string(),
                content: json!({
                    "tool_name": call.tool_name,
                    "status": status,
                    "output": result.output,
                    "reason": result.reason,
                })
                .to_string(),
            });
            self.emit_citations(&result.output, events, sequence).await;
            self.emit(
                events,
                sequence,
                RunEvent::ToolCallEnd { tool_name: call.tool_name, status: status.to_string(), sequence: *sequence },
            )
            .await;
        }
    }

    /// Surfaces up to 10 `log_id`s from a tool's row output as `citation`
    /// events, so the client can deep-link to the underlying records
    /// (`spec.md` §4.8 event kinds).
    async fn emit_citations(&self, output: &serde_json::Value, events: &mpsc::Sender<RunEvent>, sequence: &mut u64) {
        let Some(rows) = output.get("rows").and_then(serde_json::Value::as_array) else {
            return;
        };
        for row in rows.iter().take(10) {
            if let Some(log_id) = row.get("log_id").and_then(serde_json::Value::as_str) {
                self.emit(events, sequence, RunEvent::Citation { log_id: log_id.to_string(), sequence: *sequence }).await;
            }
        }
    }

    /// Compresses older messages into a single summary turn, keeping only the
    /// most recent exchange verbatim (`spec.md` §4.7 Token budget).
    async fn summarize(&self, state: &mut RunState) -> Signal {
        if state.messages.len() <= 2 {
            return Signal::SummarizeFailed;
        }
        let (keep, older) = state.messages.split_at(state.messages.len() - 2);
        let summary = format!("[summary of {} earlier messages]", keep.len());
        let mut compacted = vec![ChatMessage { role: "system".to_string(), content: summary }];
        compacted.extend_from_slice(older);
        state.messages = compacted;

        if state.token_budget.exhausted_after_summarize() {
            Signal::SummarizeFailed
        } else {
            Signal::SummarizeSucceeded
        }
    }

    async fn run_commands(
        &self,
        state: &RunState,
        commands: Vec<Command>,
        events: &mpsc::Sender<RunEvent>,
        sequence: &mut u64,
    ) {
        for command in commands {
            match command {
                Command::PersistCheckpoint => {
                    if let Err(err) = self.persist_checkpoint(state).await {
                        tracing::error!(%err, "failed to persist checkpoint");
                    }
                    self.emit(events, sequence, RunEvent::Checkpoint { node: node_label(state.node).to_string(), sequence: *sequence }).await;
                }
                Command::RunTool(_) => {
                    // Execution itself happens in `act`; the reducer only
                    // enumerates which calls to make.
                }
                Command::RequestSummarization => {}
                Command::EmitDone => {
                    if let Some(last) = state.messages.last() {
                        if last.role == "assistant" {
                            self.emit(events, sequence, RunEvent::Token { text: last.content.clone(), sequence: *sequence }).await;
                        }
                    }
                    self.emit(events, sequence, RunEvent::Done { sequence: *sequence }).await;
                }
                Command::EmitFailed(reason) => {
                    self.emit(events, sequence, RunEvent::Error { reason, sequence: *sequence }).await;
                }
            }
        }
    }

    async fn persist_checkpoint(&self, state: &RunState) -> Result<(), StoreError> {
        let failed = state.node == Node::Failed;
        self.store
            .save_checkpoint(
                &state.session_id,
                &state.run_id,
                node_label(state.node),
                serde_json::to_value(state).unwrap_or(serde_json::Value::Null),
                None,
                failed,
            )
            .await?;
        if let Some(last) = state.messages.last() {
            let role = match last.role.as_str() {
                "assistant" => MessageRole::Assistant,
                "tool" => MessageRole::Tool,
                "system" => MessageRole::System,
                _ => MessageRole::User,
            };
            self.store
                .append_message(&state.session_id, role, &last.content, MessageMetadata::default())
                .await?;
        }
        Ok(())
    }

    async fn emit_token_budget(&self, state: &RunState, events: &mpsc::Sender<RunEvent>, sequence: &mut u64) {
        self.emit(events, sequence, RunEvent::TokenBudget { budget: state.token_budget.clone(), sequence: *sequence }).await;
    }

    async fn emit(&self, events: &mpsc::Sender<RunEvent>, sequence: &mut u64, event: RunEvent) {
        *sequence += 1;
        if events.send(event).await.is_err() {
            tracing::debug!("run event receiver dropped; consumer disconnected");
        }
    }
}

fn node_label(node: Node) -> &'static str {
    match node {
        Node::Plan => "plan",
        Node::Act => "act",
        Node::Observe => "observe",
        Node::Summarize => "summarize",
        Node::Done => "done",
        Node::Failed => "failed",
    }
}
