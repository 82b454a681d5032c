//! LLM provider abstraction. Ambient stack (not one of C1–C9) but needed by
//! the Agent Orchestrator's `plan` node to propose tool calls and draft
//! prose back to the caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A single decision the planner can make after reading the conversation:
/// either propose tool calls, or conclude the answer is ready.
#[derive(Debug, Clone)]
pub enum PlanDecision {
    CallTools(Vec<ProposedToolCall>),
    Answer(String),
}

#[derive(Debug, Clone)]
pub struct ProposedToolCall {
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request timed out")]
    Timeout,
    #[error("provider call cancelled")]
    Cancelled,
    #[error("provider transport error: {0}")]
    Transport(String),
}

/// Grounded in the teacher's `Provider` trait (`tandem-providers`), narrowed
/// to the single `plan` call the orchestrator needs.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn plan(
        &self,
        messages: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<(PlanDecision, TokenUsage), ProviderError>;
}

/// Deterministic provider for tests and offline scenarios: looks for a
/// `log_search`-shaped question and proposes exactly that tool call once,
/// then answers on the next turn. Mirrors the corpus's convention of
/// shipping a fake/local provider alongside the real network ones.
pub struct FakeProvider {
    pub canned_answer: String,
}

#[async_trait]
impl Provider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn plan(
        &self,
        messages: &[ChatMessage],
        _cancel: CancellationToken,
    ) -> Result<(PlanDecision, TokenUsage), ProviderError> {
        let already_called_tool = messages.iter().any(|m| m.role == "tool");
        let usage = TokenUsage {
            prompt_tokens: messages.iter().map(|m| m.content.len() as u64).sum(),
            completion_tokens: 8,
            total_tokens: 0,
        };
        let mut usage = usage;
        usage.total_tokens = usage.prompt_tokens + usage.completion_tokens;

        if already_called_tool {
            return Ok((PlanDecision::Answer(self.canned_answer.clone()), usage));
        }

        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.clone())
            .unwrap_or_default();

        if last_user.to_ascii_lowercase().contains("error") {
            let call = ProposedToolCall {
                tool_name: "log_search".to_string(),
                arguments: serde_json::json!({
                    "time_window_hours": 1,
                    "limit": 50,
                    "severity": "ERROR",
                }),
            };
            Ok((PlanDecision::CallTools(vec![call]), usage))
        } else {
            Ok((PlanDecision::Answer(self.canned_answer.clone()), usage))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_provider_proposes_log_search_for_error_question() {
        let provider = FakeProvider {
            canned_answer: "done".to_string(),
        };
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: "Show ERROR logs in the last hour".to_string(),
        }];
        let (decision, _usage) = provider
            .plan(&messages, CancellationToken::new())
            .await
            .unwrap();
        match decision {
            PlanDecision::CallTools(calls) => {
                assert_eq!(calls.len(), 1);
                assert_eq!(calls[0].tool_name, "log_search");
            }
            PlanDecision::Answer(_) => panic!("expected a tool call"),
        }
    }

    #[tokio::test]
    async fn fake_provider_answers_after_a_tool_result_is_present() {
        let provider = FakeProvider {
            canned_answer: "here are your errors".to_string(),
        };
        let messages = vec![
            ChatMessage {
                role: "user".to_string(),
                content: "Show ERROR logs".to_string(),
            },
            ChatMessage {
                role: "tool".to_string(),
                content: "{\"rows\": []}".to_string(),
            },
        ];
        let (decision, _usage) = provider
            .plan(&messages, CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(decision, PlanDecision::Answer(_)));
    }
}
