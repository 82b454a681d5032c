//! Canonical Contract (C1): the static, versioned schema every other
//! component reads through. Nothing here touches a source table directly.

mod envelope;
mod row;
mod severity;

pub use envelope::{
    Actor, Correlation, Envelope, PiiRisk, RedactionState, RetentionClass, Versioning, Privacy,
    CONTRACT_SCHEMA_VERSION,
};
pub use row::{CanonicalLogRow, RowInvariantError};
pub use severity::{InvalidSeverity, Severity};

/// Group-by dimensions the Query Planner and Tool Runtime are allowed to
/// aggregate on (`spec.md` §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupByField {
    Severity,
    ServiceName,
    SourceTable,
    ResourceType,
}

impl GroupByField {
    pub fn column(self) -> &'static str {
        match self {
            GroupByField::Severity => "severity",
            GroupByField::ServiceName => "service_name",
            GroupByField::SourceTable => "source_table",
            GroupByField::ResourceType => "resource_type",
        }
    }
}

impl std::str::FromStr for GroupByField {
    type Err = UnknownGroupBy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "severity" => Ok(GroupByField::Severity),
            "service_name" => Ok(GroupByField::ServiceName),
            "source_table" => Ok(GroupByField::SourceTable),
            "resource_type" => Ok(GroupByField::ResourceType),
            other => Err(UnknownGroupBy(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown group_by field `{0}`")]
pub struct UnknownGroupBy(pub String);
