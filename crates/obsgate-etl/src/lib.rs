//! ETL Normalizer (C4): reads heterogeneous source tables, derives a
//! universal envelope, classifies PII, and produces canonical rows.

mod deadletter;
mod envelope_derive;
mod idkey;
mod jobstate;
mod mapping;
mod normalizer;
mod source;

pub use deadletter::{DeadLetterRecord, DeadLetterSink, InMemoryDeadLetterSink};
pub use envelope_derive::{classify_pii_risk, derive_environment, retention_class};
pub use idkey::{synthesize_log_id, synthesize_trace_context};
pub use jobstate::{ClaimError, JobRunState, JobState, JobStateTracker, MAX_ATTEMPTS};
pub use mapping::{mapping_for, NormalizeError, SourceMapping};
pub use normalizer::{
    normalize_batch, run_unit_of_work, NormalizeRunReport, DEFAULT_BATCH_SIZE,
    DEFAULT_ERROR_THRESHOLD_PCT, YIELD_EVERY_ROWS,
};
pub use source::{RawSourceRow, SourceTableKind};
