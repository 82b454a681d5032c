use std::str::FromStr;

use chrono::{DateTime, Utc};
use obsgate_contract::{
    Actor, CanonicalLogRow, Correlation, Envelope, PiiRisk, Privacy, RedactionState, Severity,
    Versioning, CONTRACT_SCHEMA_VERSION,
};
use serde_json::Value;

use crate::envelope_derive::{classify_pii_risk, derive_environment, retention_class};
use crate::idkey::{synthesize_log_id, synthesize_trace_context};
use crate::source::{RawSourceRow, SourceTableKind};

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unparseable timestamp `{0}`")]
    BadTimestamp(String),
}

/// One mapping function per source table (`spec.md` §4.4 step 2, Design
/// Note §9). Never parses a payload generically — each impl knows its own
/// table's shape.
pub trait SourceMapping: Send + Sync {
    fn kind(&self) -> SourceTableKind;
    fn normalize(&self, raw: &RawSourceRow) -> Result<CanonicalLogRow, NormalizeError>;
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, NormalizeError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| NormalizeError::BadTimestamp(raw.to_string()))
}

fn str_field<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn severity_or_default(payload: &Value) -> Severity {
    str_field(payload, "severity")
        .and_then(|s| Severity::from_str(s).ok())
        .unwrap_or(Severity::Default)
}

fn labels_from(payload: &Value) -> Vec<(String, String)> {
    payload
        .get("labels")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn base_envelope(
    service_name: &str,
    log_type: &str,
    message: &str,
    json_payload: Option<&str>,
    labels: &[(String, String)],
) -> Envelope {
    Envelope {
        schema_version: CONTRACT_SCHEMA_VERSION.to_string(),
        environment: derive_environment(labels, service_name),
        actor: Actor::default(),
        correlation: Correlation::default(),
        privacy: Privacy {
            pii_risk: classify_pii_risk(message, json_payload),
            redaction_state: RedactionState::Unredacted,
            retention_class: retention_class(log_type),
        },
        versioning: Versioning {
            mapper_version: Some("1".to_string()),
        },
        labels: labels.iter().map(|(k, v)| format!("{k}={v}")).collect(),
    }
}

macro_rules! synth_log_id {
    ($kind:expr, $event_ts:expr, $native_id:expr, $message:expr) => {
        synthesize_log_id($kind.table_name(), $event_ts, $native_id, $message)
    };
}

pub struct CloudAuditLogMapping;
impl SourceMapping for CloudAuditLogMapping {
    fn kind(&self) -> SourceTableKind {
        SourceTableKind::CloudAuditLog
    }

    fn normalize(&self, raw: &RawSourceRow) -> Result<CanonicalLogRow, NormalizeError> {
        let event_ts = parse_ts(&raw.timestamp)?;
        let payload = &raw.payload;
        let service_name = str_field(payload, "service_name")
            .ok_or(NormalizeError::MissingField("service_name"))?
            .to_string();
        let method_name = str_field(payload, "method_name").unwrap_or("unknown_method");
        let message = format!("audit: {method_name}");
        let labels = labels_from(payload);
        let log_id = synth_log_id!(self.kind(), event_ts, raw.native_id.as_deref(), &message);

        Ok(CanonicalLogRow {
            log_id,
            event_ts,
            ingest_ts: Utc::now(),
            severity: severity_or_default(payload),
            service_name: service_name.clone(),
            log_type: "audit".to_string(),
            resource_type: str_field(payload, "resource_type")
                .unwrap_or("audited_resource")
                .to_string(),
            source_table: self.kind().table_name().to_string(),
            source_dataset: str_field(payload, "dataset").unwrap_or("prod").to_string(),
            message: message.clone(),
            text_payload: None,
            json_payload: Some(payload.to_string()),
            proto_payload: None,
            http_method: None,
            http_url: None,
            http_status: None,
            http_latency_ms: None,
            trace_id: str_field(payload, "trace_id").map(str::to_string),
            span_id: str_field(payload, "span_id").map(str::to_string),
            parent_span_id: None,
            trace_sampled: false,
            envelope: base_envelope(&service_name, "audit", &message, Some(&payload.to_string()), &labels),
            is_error: false,
            is_audit: true,
            is_request: false,
            has_trace: str_field(payload, "trace_id").is_some(),
        })
    }
}

pub struct CloudRunRequestLogMapping;
impl SourceMapping for CloudRunRequestLogMapping {
    fn kind(&self) -> SourceTableKind {
        SourceTableKind::CloudRunRequestLog
    }

    fn normalize(&self, raw: &RawSourceRow) -> Result<CanonicalLogRow, NormalizeError> {
        let event_ts = parse_ts(&raw.timestamp)?;
        let payload = &raw.payload;
        let service_name = str_field(payload, "revision_name")
            .or_else(|| str_field(payload, "service_name"))
            .ok_or(NormalizeError::MissingField("revision_name"))?
            .to_string();
        let http_url = str_field(payload, "request_url").map(str::to_string);
        let message = format!(
            "{} {} -> {}",
            str_field(payload, "request_method").unwrap_or("GET"),
            http_url.clone().unwrap_or_default(),
            payload.get("status").and_then(Value::as_i64).unwrap_or(0)
        );
        let labels = labels_from(payload);
        let log_id = synth_log_id!(self.kind(), event_ts, raw.native_id.as_deref(), &message);

        let (trace_id, span_id) = match str_field(payload, "trace_id") {
            Some(t) => (t.to_string(), str_field(payload, "span_id").unwrap_or("").to_string()),
            None => synthesize_trace_context(
                &service_name,
                event_ts,
                raw.native_id.as_deref().unwrap_or("no-insert-id"),
            ),
        };

        Ok(CanonicalLogRow {
            log_id,
            event_ts,
            ingest_ts: Utc::now(),
            severity: severity_or_default(payload),
            service_name: service_name.clone(),
            log_type: "request".to_string(),
            resource_type: "cloud_run_revision".to_string(),
            source_table: self.kind().table_name().to_string(),
            source_dataset: str_field(payload, "dataset").unwrap_or("prod").to_string(),
            message: message.clone(),
            text_payload: None,
            json_payload: Some(payload.to_string()),
            proto_payload: None,
            http_method: str_field(payload, "request_method").map(str::to_string),
            http_url,
            http_status: payload.get("status").and_then(Value::as_u64).map(|s| s as u16),
            http_latency_ms: payload.get("latency_ms").and_then(Value::as_u64),
            trace_id: Some(trace_id),
            span_id: Some(span_id),
            parent_span_id: None,
            trace_sampled: payload
                .get("trace_sampled")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            envelope: base_envelope(&service_name, "request", &message, Some(&payload.to_string()), &labels),
            is_error: false,
            is_audit: false,
            is_request: true,
            has_trace: true,
        })
    }
}

pub struct CloudFunctionsLogMapping;
impl SourceMapping for CloudFunctionsLogMapping {
    fn kind(&self) -> SourceTableKind {
        SourceTableKind::CloudFunctionsLog
    }

    fn normalize(&self, raw: &RawSourceRow) -> Result<CanonicalLogRow, NormalizeError> {
        let event_ts = parse_ts(&raw.timestamp)?;
        let payload = &raw.payload;
        let service_name = str_field(payload, "function_name")
            .ok_or(NormalizeError::MissingField("function_name"))?
            .to_string();
        let message = str_field(payload, "text_payload")
            .map(str::to_string)
            .unwrap_or_else(|| "function log".to_string());
        let labels = labels_from(payload);
        let log_id = synth_log_id!(self.kind(), event_ts, raw.native_id.as_deref(), &message);

        Ok(CanonicalLogRow {
            log_id,
            event_ts,
            ingest_ts: Utc::now(),
            severity: severity_or_default(payload),
            service_name: service_name.clone(),
            log_type: "app".to_string(),
            resource_type: "cloud_function".to_string(),
            source_table: self.kind().table_name().to_string(),
            source_dataset: str_field(payload, "dataset").unwrap_or("prod").to_string(),
            message: message.clone(),
            text_payload: Some(message.clone()),
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
            envelope: base_envelope(&service_name, "app", &message, None, &labels),
            is_error: severity_or_default(payload).is_error_or_worse(),
            is_audit: false,
            is_request: false,
            has_trace: false,
        })
    }
}

pub struct VpcFlowLogMapping;
impl SourceMapping for VpcFlowLogMapping {
    fn kind(&self) -> SourceTableKind {
        SourceTableKind::VpcFlowLog
    }

    fn normalize(&self, raw: &RawSourceRow) -> Result<CanonicalLogRow, NormalizeError> {
        let event_ts = parse_ts(&raw.timestamp)?;
        let payload = &raw.payload;
        let service_name = "vpc-flow".to_string();
        let message = format!(
            "{} -> {} bytes={}",
            str_field(payload, "src_ip").unwrap_or("?"),
            str_field(payload, "dest_ip").unwrap_or("?"),
            payload.get("bytes_sent").and_then(Value::as_i64).unwrap_or(0)
        );
        let log_id = synth_log_id!(self.kind(), event_ts, raw.native_id.as_deref(), &message);

        Ok(CanonicalLogRow {
            log_id,
            event_ts,
            ingest_ts: Utc::now(),
            severity: Severity::Info,
            service_name: service_name.clone(),
            log_type: "network".to_string(),
            resource_type: "vpc_flow".to_string(),
            source_table: self.kind().table_name().to_string(),
            source_dataset: str_field(payload, "dataset").unwrap_or("prod").to_string(),
            message: message.clone(),
            text_payload: None,
            json_payload: Some(payload.to_string()),
            proto_payload: None,
            http_method: None,
            http_url: None,
            http_status: None,
            http_latency_ms: None,
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            trace_sampled: false,
            envelope: base_envelope(&service_name, "network", &message, Some(&payload.to_string()), &[]),
            is_error: false,
            is_audit: false,
            is_request: false,
            has_trace: false,
        })
    }
}

pub struct GenericJsonLogMapping;
impl SourceMapping for GenericJsonLogMapping {
    fn kind(&self) -> SourceTableKind {
        SourceTableKind::GenericJsonLog
    }

    fn normalize(&self, raw: &RawSourceRow) -> Result<CanonicalLogRow, NormalizeError> {
        let event_ts = parse_ts(&raw.timestamp)?;
        let payload = &raw.payload;
        let service_name = str_field(payload, "service_name")
            .unwrap_or("unknown-service")
            .to_string();
        let message = str_field(payload, "message")
            .map(str::to_string)
            .unwrap_or_else(|| payload.to_string());
        let labels = labels_from(payload);
        let log_id = synth_log_id!(self.kind(), event_ts, raw.native_id.as_deref(), &message);

        Ok(CanonicalLogRow {
            log_id,
            event_ts,
            ingest_ts: Utc::now(),
            severity: severity_or_default(payload),
            service_name: service_name.clone(),
            log_type: "app".to_string(),
            resource_type: "generic_task".to_string(),
            source_table: self.kind().table_name().to_string(),
            source_dataset: str_field(payload, "dataset").unwrap_or("prod").to_string(),
            message: message.clone(),
            text_payload: None,
            json_payload: Some(payload.to_string()),
            proto_payload: None,
            http_method: None,
            http_url: None,
            http_status: None,
            http_latency_ms: None,
            trace_id: str_field(payload, "trace_id").map(str::to_string),
            span_id: str_field(payload, "span_id").map(str::to_string),
            parent_span_id: None,
            trace_sampled: false,
            envelope: base_envelope(&service_name, "app", &message, Some(&payload.to_string()), &labels),
            is_error: severity_or_default(payload).is_error_or_worse(),
            is_audit: false,
            is_request: false,
            has_trace: str_field(payload, "trace_id").is_some(),
        })
    }
}

/// Init-time registry: `match` on [`SourceTableKind`], not reflection.
pub fn mapping_for(kind: SourceTableKind) -> Box<dyn SourceMapping> {
    match kind {
        SourceTableKind::CloudAuditLog => Box::new(CloudAuditLogMapping),
        SourceTableKind::CloudRunRequestLog => Box::new(CloudRunRequestLogMapping),
        SourceTableKind::CloudFunctionsLog => Box::new(CloudFunctionsLogMapping),
        SourceTableKind::VpcFlowLog => Box::new(VpcFlowLogMapping),
        SourceTableKind::GenericJsonLog => Box::new(GenericJsonLogMapping),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(kind: SourceTableKind, native_id: Option<&str>, payload: Value) -> RawSourceRow {
        RawSourceRow {
            table: kind,
            native_id: native_id.map(str::to_string),
            timestamp: "2026-01-01T00:00:00Z".to_string(),
            payload,
        }
    }

    #[test]
    fn cloud_run_request_log_maps_request_fields() {
        let mapping = CloudRunRequestLogMapping;
        let row = mapping
            .normalize(&raw(
                SourceTableKind::CloudRunRequestLog,
                Some("ins-1"),
                json!({
                    "revision_name": "checkout-001",
                    "request_method": "GET",
                    "request_url": "/healthz",
                    "status": 200,
                    "latency_ms": 12,
                    "severity": "INFO",
                }),
            ))
            .unwrap();
        assert_eq!(row.service_name, "checkout-001");
        assert!(row.is_request);
        assert!(row.has_trace);
        assert_eq!(row.http_status, Some(200));
        assert!(row.check_invariants().is_ok());
    }

    #[test]
    fn generic_json_mapping_falls_back_to_default_severity() {
        let mapping = GenericJsonLogMapping;
        let row = mapping
            .normalize(&raw(
                SourceTableKind::GenericJsonLog,
                None,
                json!({"service_name": "batch", "message": "tick"}),
            ))
            .unwrap();
        assert_eq!(row.severity, Severity::Default);
    }

    #[test]
    fn audit_log_mapping_sets_audit_flag_and_retention() {
        let mapping = CloudAuditLogMapping;
        let row = mapping
            .normalize(&raw(
                SourceTableKind::CloudAuditLog,
                Some("a1"),
                json!({"service_name": "iam", "method_name": "SetIamPolicy"}),
            ))
            .unwrap();
        assert!(row.is_audit);
        assert_eq!(
            row.envelope.privacy.retention_class,
            obsgate_contract::RetentionClass::Audit
        );
    }

    #[test]
    fn missing_required_field_is_a_normalize_error() {
        let mapping = CloudRunRequestLogMapping;
        let err = mapping
            .normalize(&raw(SourceTableKind::CloudRunRequestLog, None, json!({})))
            .unwrap_err();
        assert!(matches!(err, NormalizeError::MissingField("revision_name")));
    }

    #[test]
    fn bad_timestamp_is_a_normalize_error() {
        let mapping = GenericJsonLogMapping;
        let mut row = raw(SourceTableKind::GenericJsonLog, None, json!({"service_name": "x"}));
        row.timestamp = "not-a-timestamp".to_string();
        assert!(matches!(
            mapping.normalize(&row).unwrap_err(),
            NormalizeError::BadTimestamp(_)
        ));
    }

    #[test]
    fn every_mapping_produces_invariant_satisfying_rows() {
        for kind in SourceTableKind::ALL {
            let mapping = mapping_for(kind);
            let payload = json!({
                "service_name": "svc",
                "revision_name": "svc",
                "function_name": "svc",
                "method_name": "Get",
                "src_ip": "10.0.0.1",
                "dest_ip": "10.0.0.2",
                "message": "hi",
            });
            let row = mapping.normalize(&raw(kind, Some("n"), payload)).unwrap();
            assert!(row.check_invariants().is_ok());
        }
    }
}
