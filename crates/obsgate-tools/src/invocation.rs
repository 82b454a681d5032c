use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// `spec.md` §3 ToolInvocation: telemetry the Tool Runtime exclusively
/// writes. Never mutated by readers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub id: u64,
    pub session_id: String,
    pub tool_name: String,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub status: InvocationStatus,
    pub started_ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_ts: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Running,
    Completed,
    Error,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Assigns monotonic invocation ids and records start/finish telemetry for
/// every tool call, per `spec.md` §4.6 ("The runtime wraps every tool call
/// with ... a monotonic invocation id, timing ... status transitions").
#[derive(Clone, Default)]
pub struct InvocationRecorder {
    log: Arc<Mutex<Vec<ToolInvocation>>>,
}

impl InvocationRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(&self, session_id: &str, tool_name: &str, input: Value) -> ToolInvocation {
        let invocation = ToolInvocation {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            input,
            output: None,
            status: InvocationStatus::Running,
            started_ts: Utc::now(),
            completed_ts: None,
            duration_ms: None,
            tokens: None,
            cost_usd: None,
        };
        self.log.lock().await.push(invocation.clone());
        invocation
    }

    pub async fn finish(&self, id: u64, status: InvocationStatus, output: Value) {
        let mut log = self.log.lock().await;
        if let Some(entry) = log.iter_mut().find(|inv| inv.id == id) {
            let now = Utc::now();
            entry.completed_ts = Some(now);
            entry.duration_ms = Some((now - entry.started_ts).num_milliseconds().max(0) as u64);
            entry.status = status;
            entry.output = Some(output);
        }
    }

    pub async fn history(&self, session_id: &str) -> Vec<ToolInvocation> {
        self.log
            .lock()
            .await
            .iter()
            .filter(|inv| inv.session_id == session_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ids_are_monotonic_within_a_recorder() {
        let recorder = InvocationRecorder::new();
        let a = recorder.start("s1", "log_search", serde_json::json!({})).await;
        let b = recorder.start("s1", "log_search", serde_json::json!({})).await;
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn finish_records_completed_status_and_duration() {
        let recorder = InvocationRecorder::new();
        let inv = recorder.start("s1", "dry_run", serde_json::json!({})).await;
        recorder
            .finish(inv.id, InvocationStatus::Completed, serde_json::json!({"ok": true}))
            .await;
        let history = recorder.history("s1").await;
        let updated = history.iter().find(|i| i.id == inv.id).unwrap();
        assert_eq!(updated.status, InvocationStatus::Completed);
        assert!(updated.duration_ms.is_some());
        assert!(updated.output.is_some());
    }

    #[tokio::test]
    async fn history_is_scoped_to_session() {
        let recorder = InvocationRecorder::new();
        recorder.start("s1", "log_search", serde_json::json!({})).await;
        recorder.start("s2", "log_search", serde_json::json!({})).await;
        assert_eq!(recorder.history("s1").await.len(), 1);
    }
}
