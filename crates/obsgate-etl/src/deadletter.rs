use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::source::SourceTableKind;

/// The concrete shape of the "dead-letter sink" `spec.md` §4.4 names: a
/// normalization failure carries its original payload and the reason,
/// without ever blocking the rest of the batch.
#[derive(Debug, Clone)]
pub struct DeadLetterRecord {
    pub source_table: SourceTableKind,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub raw_payload: Value,
    pub reason: String,
    pub failed_ts: DateTime<Utc>,
}

pub trait DeadLetterSink: Send + Sync {
    fn record(&mut self, record: DeadLetterRecord);
}

#[derive(Default)]
pub struct InMemoryDeadLetterSink {
    pub records: Vec<DeadLetterRecord>,
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn record(&mut self, record: DeadLetterRecord) {
        self.records.push(record);
    }
}
