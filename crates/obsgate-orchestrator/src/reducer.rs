use crate::model::{Command, Node, PendingToolCall, RunState, Signal};

/// Tool calls proposed per turn before `observe → plan` forces a
/// `summarize` instead (`spec.md` §4.7, default N = 6).
pub const DEFAULT_MAX_TOOL_CALLS_PER_TURN: u32 = 6;

/// Pure transition function, grounded in the teacher's
/// `DefaultMissionReducer::reduce` (`tandem-orchestrator/src/reducer.rs`):
/// no I/O, no side effects — it only decides the next [`Node`] and which
/// [`Command`]s the driver must carry out.
pub fn reduce(
    state: &RunState,
    signal: Signal,
    max_tool_calls_per_turn: u32,
) -> (RunState, Vec<Command>) {
    let mut next = state.clone();
    let mut commands = Vec::new();

    // A cancellation or unhandled error always wins over the node's normal
    // transitions (`spec.md` §4.7: "any error not handled by tool runtime
    // → failed"; "on cancel, ... closes the stream with a final event").
    match signal {
        Signal::Cancelled => {
            next.cancelled = true;
            next.node = Node::Failed;
            commands.push(Command::PersistCheckpoint);
            commands.push(Command::EmitFailed("cancelled".to_string()));
            return (next, commands);
        }
        Signal::UnhandledError(reason) => {
            next.node = Node::Failed;
            commands.push(Command::PersistCheckpoint);
            commands.push(Command::EmitFailed(reason));
            return (next, commands);
        }
        Signal::BudgetOverrun if next.node != Node::Summarize => {
            next.node = Node::Summarize;
            commands.push(Command::PersistCheckpoint);
            commands.push(Command::RequestSummarization);
            return (next, commands);
        }
        _ => {}
    }

    match (next.node, signal) {
        (Node::Plan, Signal::PlanProposedTools(calls)) if !calls.is_empty() => {
            next.pending_tool_calls = calls.iter().map(PendingToolCall::from).collect();
            next.tool_calls_this_turn += calls.len() as u32;
            next.node = Node::Act;
            commands.push(Command::PersistCheckpoint);
            commands.extend(next.pending_tool_calls.iter().cloned().map(Command::RunTool));
        }
        (Node::Plan, Signal::PlanProposedTools(_)) => {
            // Planner returned an empty tool call list: treat as "nothing
            // left to do" rather than looping forever.
            next.node = Node::Done;
            commands.push(Command::PersistCheckpoint);
            commands.push(Command::EmitDone);
        }
        (Node::Plan, Signal::PlanConcludedAnswer(_)) => {
            next.node = Node::Done;
            commands.push(Command::PersistCheckpoint);
            commands.push(Command::EmitDone);
        }
        (Node::Act, Signal::ToolReturned) => {
            next.node = Node::Observe;
            commands.push(Command::PersistCheckpoint);
        }
        (Node::Observe, _) => {
            if next.tool_calls_this_turn <= max_tool_calls_per_turn {
                next.node = Node::Plan;
            } else {
                next.node = Node::Summarize;
                commands.push(Command::RequestSummarization);
            }
            commands.push(Command::PersistCheckpoint);
        }
        (Node::Summarize, Signal::SummarizeSucceeded) => {
            next.tool_calls_this_turn = 0;
            next.node = Node::Plan;
            commands.push(Command::PersistCheckpoint);
        }
        (Node::Summarize, Signal::SummarizeFailed) => {
            next.node = Node::Failed;
            commands.push(Command::PersistCheckpoint);
            commands.push(Command::EmitFailed("BudgetExhausted".to_string()));
        }
        (node, _) => {
            tracing::debug!(?node, "signal ignored in current node");
        }
    }

    (next, commands)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TokenBudget;
    use obsgate_providers::ProposedToolCall;
    use serde_json::json;

    fn base_state() -> RunState {
        RunState::new("run-1", "session-1", TokenBudget::new(10_000, "fake"))
    }

    fn tool_call(name: &str) -> ProposedToolCall {
        ProposedToolCall {
            tool_name: name.to_string(),
            arguments: json!({}),
        }
    }

    #[test]
    fn plan_to_act_on_nonempty_tool_calls() {
        let state = base_state();
        let (next, commands) = reduce(
            &state,
            Signal::PlanProposedTools(vec![tool_call("log_search")]),
            DEFAULT_MAX_TOOL_CALLS_PER_TURN,
        );
        assert_eq!(next.node, Node::Act);
        assert!(commands.contains(&Command::PersistCheckpoint));
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::RunTool(call) if call.tool_name == "log_search")));
    }

    #[test]
    fn plan_to_done_when_answer_ready() {
        let state = base_state();
        let (next, commands) = reduce(
            &state,
            Signal::PlanConcludedAnswer("here you go".to_string()),
            DEFAULT_MAX_TOOL_CALLS_PER_TURN,
        );
        assert_eq!(next.node, Node::Done);
        assert!(commands.contains(&Command::EmitDone));
    }

    #[test]
    fn act_to_observe_after_tool_returns() {
        let mut state = base_state();
        state.node = Node::Act;
        let (next, _) = reduce(&state, Signal::ToolReturned, DEFAULT_MAX_TOOL_CALLS_PER_TURN);
        assert_eq!(next.node, Node::Observe);
    }

    #[test]
    fn observe_to_plan_under_the_cap() {
        let mut state = base_state();
        state.node = Node::Observe;
        state.tool_calls_this_turn = 3;
        let (next, _) = reduce(&state, Signal::ToolReturned, DEFAULT_MAX_TOOL_CALLS_PER_TURN);
        assert_eq!(next.node, Node::Plan);
    }

    #[test]
    fn observe_to_summarize_over_the_cap() {
        let mut state = base_state();
        state.node = Node::Observe;
        state.tool_calls_this_turn = DEFAULT_MAX_TOOL_CALLS_PER_TURN + 1;
        let (next, commands) = reduce(&state, Signal::ToolReturned, DEFAULT_MAX_TOOL_CALLS_PER_TURN);
        assert_eq!(next.node, Node::Summarize);
        assert!(commands.contains(&Command::RequestSummarization));
    }

    #[test]
    fn budget_overrun_forces_summarize_from_any_node() {
        let mut state = base_state();
        state.node = Node::Act;
        let (next, commands) = reduce(&state, Signal::BudgetOverrun, DEFAULT_MAX_TOOL_CALLS_PER_TURN);
        assert_eq!(next.node, Node::Summarize);
        assert!(commands.contains(&Command::RequestSummarization));
    }

    #[test]
    fn summarize_failure_terminates_with_budget_exhausted() {
        let mut state = base_state();
        state.node = Node::Summarize;
        let (next, commands) = reduce(&state, Signal::SummarizeFailed, DEFAULT_MAX_TOOL_CALLS_PER_TURN);
        assert_eq!(next.node, Node::Failed);
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::EmitFailed(reason) if reason == "BudgetExhausted")));
    }

    #[test]
    fn cancellation_wins_over_any_other_signal() {
        let mut state = base_state();
        state.node = Node::Act;
        let (next, commands) = reduce(&state, Signal::Cancelled, DEFAULT_MAX_TOOL_CALLS_PER_TURN);
        assert_eq!(next.node, Node::Failed);
        assert!(next.cancelled);
        assert!(commands
            .iter()
            .any(|c| matches!(c, Command::EmitFailed(reason) if reason == "cancelled")));
    }
}
