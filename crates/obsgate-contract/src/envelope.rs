use serde::{Deserialize, Serialize};

/// PII risk classification produced by the ETL's regex-based classifier
/// (`spec.md` §4.4 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiRisk {
    None,
    Low,
    Moderate,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    Standard,
    Audit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Actor {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Correlation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Privacy {
    pub pii_risk: PiiRisk,
    pub redaction_state: RedactionState,
    pub retention_class: RetentionClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedactionState {
    Unredacted,
    Redacted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Versioning {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mapper_version: Option<String>,
}

/// The nested cross-cutting metadata attached to every canonical row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub schema_version: String,
    pub environment: String,
    #[serde(default)]
    pub actor: Actor,
    #[serde(default)]
    pub correlation: Correlation,
    pub privacy: Privacy,
    #[serde(default)]
    pub versioning: Versioning,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// The schema version written by this normalizer. A bump here must be
/// additive-only (minor) or accompanied by a new logical view (major),
/// per `spec.md` §4.1.
pub const CONTRACT_SCHEMA_VERSION: &str = "2.0";
