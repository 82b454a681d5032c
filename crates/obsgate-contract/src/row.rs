use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::severity::Severity;

/// The single source of truth consumed by the Query Planner, the Tool
/// Runtime, and every HTTP reader. Produced exclusively by the ETL
/// Normalizer (C4); immutable once written (`spec.md` §3 Lifecycle).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLogRow {
    pub log_id: String,
    pub event_ts: DateTime<Utc>,
    pub ingest_ts: DateTime<Utc>,
    pub severity: Severity,

    pub service_name: String,
    pub log_type: String,
    pub resource_type: String,
    pub source_table: String,
    pub source_dataset: String,

    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_payload: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto_payload: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_latency_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub trace_sampled: bool,

    pub envelope: Envelope,

    pub is_error: bool,
    pub is_audit: bool,
    pub is_request: bool,
    pub has_trace: bool,
}

/// Invariant violation detected at write time (`spec.md` §3 Invariants,
/// §7 `DataIntegrityError`). Rows that fail this check are routed to the
/// ETL dead-letter sink; they are never written to the fact table.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RowInvariantError {
    #[error("source_table must not be empty")]
    EmptySourceTable,
    #[error("log_id must not be empty")]
    EmptyLogId,
    #[error("schema_version `{0}` does not match contract version `{1}`")]
    SchemaVersionMismatch(String, String),
}

impl CanonicalLogRow {
    pub fn severity_level(&self) -> u8 {
        self.severity.level()
    }

    /// Checks the universally-quantified invariants from `spec.md` §8
    /// property 2 plus the envelope/schema-version invariant from §3.
    pub fn check_invariants(&self) -> Result<(), RowInvariantError> {
        if self.source_table.is_empty() {
            return Err(RowInvariantError::EmptySourceTable);
        }
        if self.log_id.is_empty() {
            return Err(RowInvariantError::EmptyLogId);
        }
        if self.envelope.schema_version != crate::envelope::CONTRACT_SCHEMA_VERSION {
            return Err(RowInvariantError::SchemaVersionMismatch(
                self.envelope.schema_version.clone(),
                crate::envelope::CONTRACT_SCHEMA_VERSION.to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Actor, Correlation, PiiRisk, RedactionState, Privacy, Versioning};

    fn sample_row() -> CanonicalLogRow {
        CanonicalLogRow {
            log_id: "abc123".into(),
            event_ts: Utc::now(),
            ingest_ts: Utc::now(),
            severity: Severity::Error,
            service_name: "checkout".into(),
            log_type: "app".into(),
            resource_type: "cloud_run_revision".into(),
            source_table: "run_googleapis_com_requests".into(),
            source_dataset: "prod".into(),
            message: "boom".into(),
            text_payload: None,
            json_payload: None,
            proto_payload: None,
            http_method: None,
            http_url: None,
            http_status: None,
            http_latency_ms: None,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            trace_sampled: false,
            envelope: Envelope {
                schema_version: crate::envelope::CONTRACT_SCHEMA_VERSION.to_string(),
                environment: "prod".into(),
                actor: Actor::default(),
                correlation: Correlation::default(),
                privacy: Privacy {
                    pii_risk: PiiRisk::None,
                    redaction_state: RedactionState::Unredacted,
                    retention_class: crate::envelope::RetentionClass::Standard,
                },
                versioning: Versioning::default(),
                labels: vec![],
            },
            is_error: true,
            is_audit: false,
            is_request: true,
            has_trace: false,
        }
    }

    #[test]
    fn accepts_well_formed_row() {
        assert!(sample_row().check_invariants().is_ok());
    }

    #[test]
    fn rejects_empty_source_table() {
        let mut row = sample_row();
        row.source_table.clear();
        assert_eq!(
            row.check_invariants().unwrap_err(),
            RowInvariantError::EmptySourceTable
        );
    }

    #[test]
    fn rejects_stale_schema_version() {
        let mut row = sample_row();
        row.envelope.schema_version = "1.0".into();
        assert!(matches!(
            row.check_invariants().unwrap_err(),
            RowInvariantError::SchemaVersionMismatch(..)
        ));
    }

    #[test]
    fn severity_level_is_function_of_severity() {
        let row = sample_row();
        assert_eq!(row.severity_level(), Severity::Error.level());
    }
}
