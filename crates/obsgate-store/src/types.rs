use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `spec.md` §3 Session: created by the orchestrator (C7) at first turn,
/// mutated only by the owning orchestrator instance thereafter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_ts: DateTime<Utc>,
    pub updated_ts: DateTime<Utc>,
    pub status: SessionStatus,
    pub metadata: SessionMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Archived,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub total_messages: u64,
    pub total_cost: f64,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

/// `spec.md` §3 Message: append-only within a session, ordered by a
/// monotonic sequence the store assigns (`seq`), not by wall-clock `ts`
/// alone — two messages can share a millisecond under load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub seq: i64,
    pub role: MessageRole,
    pub content: String,
    pub ts: DateTime<Utc>,
    pub metadata: MessageMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub tokens: Option<u64>,
    #[serde(default)]
    pub tool_calls: Vec<Value>,
    #[serde(default)]
    pub cost_impact: Option<f64>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
}

/// `spec.md` §3 Checkpoint: forms a tree per run; the orchestrator resumes
/// by selecting the latest non-failed checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub session_id: String,
    pub run_id: String,
    pub node_id: String,
    pub state_blob: Value,
    pub created_ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub failed: bool,
}
