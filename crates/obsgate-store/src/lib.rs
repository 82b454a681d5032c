//! Session Store (C9): a key-value store of sessions, messages, and
//! checkpoints with per-session ordering guarantees.

mod db;
mod types;

pub use db::{SessionStore, StoreError};
pub use types::{
    Checkpoint, Message, MessageMetadata, MessageRole, Session, SessionMetadata, SessionStatus,
};
