use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::types::{
    Checkpoint, Message, MessageMetadata, MessageRole, Session, SessionMetadata, SessionStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("session `{0}` not found")]
    SessionNotFound(String),
}

/// Session Store (C9), grounded on `tandem-memory/src/db.rs`'s connection
/// pattern (`Arc<Mutex<Connection>>`). Enforces single-writer-per-session by
/// routing every mutation through a per-session lock, so two concurrent
/// orchestrator turns on the same session can never interleave writes.
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
    session_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionStore {
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            session_locks: Arc::new(Mutex::new(HashMap::new())),
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            session_locks: Arc::new(Mutex::new(HashMap::new())),
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                created_ts TEXT NOT NULL,
                updated_ts TEXT NOT NULL,
                status TEXT NOT NULL,
                metadata_json TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                ts TEXT NOT NULL,
                metadata_json TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id, seq)",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL,
                run_id TEXT NOT NULL,
                node_id TEXT NOT NULL,
                state_blob_json TEXT NOT NULL,
                created_ts TEXT NOT NULL,
                parent_id TEXT,
                failed INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_run ON checkpoints(session_id, run_id, created_ts)",
            [],
        )?;
        Ok(())
    }

    async fn lock_for_session(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn create_session(&self, user_id: &str, title: &str) -> Result<Session, StoreError> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            created_ts: Utc::now(),
            updated_ts: Utc::now(),
            status: SessionStatus::Active,
            metadata: SessionMetadata::default(),
        };
        let lock = self.lock_for_session(&session.id).await;
        let _guard = lock.lock().await;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO sessions (id, user_id, title, created_ts, updated_ts, status, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                session.id,
                session.user_id,
                session.title,
                session.created_ts.to_rfc3339(),
                session.updated_ts.to_rfc3339(),
                status_str(session.status),
                serde_json::to_string(&session.metadata)?,
            ],
        )?;
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, user_id, title, created_ts, updated_ts, status, metadata_json
                 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, user_id, title, created_ts, updated_ts, status, metadata_json)) = row else {
            return Ok(None);
        };
        Ok(Some(Session {
            id,
            user_id,
            title,
            created_ts: parse_ts(&created_ts),
            updated_ts: parse_ts(&updated_ts),
            status: parse_status(&status),
            metadata: serde_json::from_str(&metadata_json)?,
        }))
    }

    /// Appends a message, serialized per session: concurrent callers for the
    /// same `session_id` block on each other rather than interleaving.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        metadata: MessageMetadata,
    ) -> Result<Message, StoreError> {
        let lock = self.lock_for_session(session_id).await;
        let _guard = lock.lock().await;

        if self.get_session(session_id).await?.is_none() {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }

        let id = Uuid::new_v4().to_string();
        let ts = Utc::now();
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO messages (id, session_id, role, content, ts, metadata_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                session_id,
                role_str(role),
                content,
                ts.to_rfc3339(),
                serde_json::to_string(&metadata)?,
            ],
        )?;
        let seq = conn.last_insert_rowid();
        let metadata_json: String =
            conn.query_row("SELECT metadata_json FROM sessions WHERE id = ?1", params![session_id], |row| row.get(0))?;
        let mut session_metadata: SessionMetadata = serde_json::from_str(&metadata_json)?;
        session_metadata.total_messages += 1;
        conn.execute(
            "UPDATE sessions SET updated_ts = ?1, metadata_json = ?2 WHERE id = ?3",
            params![ts.to_rfc3339(), serde_json::to_string(&session_metadata)?, session_id],
        )?;

        Ok(Message {
            id,
            session_id: session_id.to_string(),
            seq,
            role,
            content: content.to_string(),
            ts,
            metadata,
        })
    }

    /// Ordered by `seq` ascending — the store's monotonic append order,
    /// robust against wall-clock ties (`spec.md` §3 Message).
    pub async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT seq, id, role, content, ts, metadata_json FROM messages
             WHERE session_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(seq, id, role, content, ts, metadata_json)| {
                Ok(Message {
                    id,
                    session_id: session_id.to_string(),
                    seq,
                    role: parse_role(&role),
                    content,
                    ts: parse_ts(&ts),
                    metadata: serde_json::from_str(&metadata_json)?,
                })
            })
            .collect()
    }

    pub async fn save_checkpoint(
        &self,
        session_id: &str,
        run_id: &str,
        node_id: &str,
        state_blob: serde_json::Value,
        parent_id: Option<&str>,
        failed: bool,
    ) -> Result<Checkpoint, StoreError> {
        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            state_blob,
            created_ts: Utc::now(),
            parent_id: parent_id.map(ToString::to_string),
            failed,
        };
        let lock = self.lock_for_session(session_id).await;
        let _guard = lock.lock().await;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO checkpoints
             (id, session_id, run_id, node_id, state_blob_json, created_ts, parent_id, failed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                checkpoint.id,
                checkpoint.session_id,
                checkpoint.run_id,
                checkpoint.node_id,
                serde_json::to_string(&checkpoint.state_blob)?,
                checkpoint.created_ts.to_rfc3339(),
                checkpoint.parent_id,
                checkpoint.failed as i64,
            ],
        )?;
        Ok(checkpoint)
    }

    /// The latest non-failed checkpoint for a run — what the orchestrator
    /// resumes from (`spec.md` §3 Checkpoint).
    pub async fn latest_checkpoint(
        &self,
        session_id: &str,
        run_id: &str,
    ) -> Result<Option<Checkpoint>, StoreError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, node_id, state_blob_json, created_ts, parent_id, failed
                 FROM checkpoints WHERE session_id = ?1 AND run_id = ?2 AND failed = 0
                 ORDER BY created_ts DESC LIMIT 1",
                params![session_id, run_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                },
            )
            .optional()?;
        let Some((id, node_id, state_blob_json, created_ts, parent_id, failed)) = row else {
            return Ok(None);
        };
        Ok(Some(Checkpoint {
            id,
            session_id: session_id.to_string(),
            run_id: run_id.to_string(),
            node_id,
            state_blob: serde_json::from_str(&state_blob_json)?,
            created_ts: parse_ts(&created_ts),
            parent_id,
            failed: failed != 0,
        }))
    }

    /// Ordered by `updated_ts` descending — most recently active first, the
    /// shape a sessions list view reads naturally.
    pub async fn list_sessions(&self, user_id: Option<&str>) -> Result<Vec<Session>, StoreError> {
        let conn = self.conn.lock().await;
        let (sql, filter): (&str, Option<&str>) = match user_id {
            Some(user_id) => (
                "SELECT id, user_id, title, created_ts, updated_ts, status, metadata_json
                 FROM sessions WHERE user_id = ?1 ORDER BY updated_ts DESC",
                Some(user_id),
            ),
            None => (
                "SELECT id, user_id, title, created_ts, updated_ts, status, metadata_json
                 FROM sessions ORDER BY updated_ts DESC",
                None,
            ),
        };
        let mut stmt = conn.prepare(sql)?;
        let map_row = |row: &rusqlite::Row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        };
        let rows = match filter {
            Some(user_id) => stmt
                .query_map(params![user_id], map_row)?
                .collect::<Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<Result<Vec<_>, _>>()?,
        };
        rows.into_iter()
            .map(|(id, user_id, title, created_ts, updated_ts, status, metadata_json)| {
                Ok(Session {
                    id,
                    user_id,
                    title,
                    created_ts: parse_ts(&created_ts),
                    updated_ts: parse_ts(&updated_ts),
                    status: parse_status(&status),
                    metadata: serde_json::from_str(&metadata_json)?,
                })
            })
            .collect()
    }

    pub async fn archive_session(&self, session_id: &str) -> Result<(), StoreError> {
        let lock = self.lock_for_session(session_id).await;
        let _guard = lock.lock().await;
        let conn = self.conn.lock().await;
        let updated = conn.execute(
            "UPDATE sessions SET status = ?1, updated_ts = ?2 WHERE id = ?3",
            params![status_str(SessionStatus::Archived), Utc::now().to_rfc3339(), session_id],
        )?;
        if updated == 0 {
            return Err(StoreError::SessionNotFound(session_id.to_string()));
        }
        Ok(())
    }
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Active => "active",
        SessionStatus::Archived => "archived",
    }
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "archived" => SessionStatus::Archived,
        _ => SessionStatus::Active,
    }
}

fn role_str(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
        MessageRole::Tool => "tool",
    }
}

fn parse_role(s: &str) -> MessageRole {
    match s {
        "assistant" => MessageRole::Assistant,
        "system" => MessageRole::System,
        "tool" => MessageRole::Tool,
        _ => MessageRole::User,
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
