use serde_json::Value;

/// A raw row as read from one upstream source table, before normalization.
/// The payload shape depends on `table` — that is exactly the heterogeneity
/// `spec.md` §9 says must never be parsed generically at read time.
#[derive(Debug, Clone)]
pub struct RawSourceRow {
    pub table: SourceTableKind,
    /// Source-native id, when the table has one.
    pub native_id: Option<String>,
    /// Raw timestamp string as read from the source (RFC3339).
    pub timestamp: String,
    /// The vendor-specific payload, still as JSON — this is the *last* point
    /// generic JSON handling is allowed; every field access below it goes
    /// through this table's own [`crate::mapping::SourceMapping`].
    pub payload: Value,
}

/// Closed, compile-time enum of source tables, per Design Note §9: "a single
/// compile-time (or init-time) enum of source tables with their mapping
/// functions." Adding a table means adding a variant + a mapping impl, never
/// a runtime schema scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceTableKind {
    CloudAuditLog,
    CloudRunRequestLog,
    CloudFunctionsLog,
    VpcFlowLog,
    GenericJsonLog,
}

impl SourceTableKind {
    pub const ALL: [SourceTableKind; 5] = [
        SourceTableKind::CloudAuditLog,
        SourceTableKind::CloudRunRequestLog,
        SourceTableKind::CloudFunctionsLog,
        SourceTableKind::VpcFlowLog,
        SourceTableKind::GenericJsonLog,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            SourceTableKind::CloudAuditLog => "cloudaudit_googleapis_com_activity",
            SourceTableKind::CloudRunRequestLog => "run_googleapis_com_requests",
            SourceTableKind::CloudFunctionsLog => "cloudfunctions_googleapis_com_cloud_functions",
            SourceTableKind::VpcFlowLog => "compute_googleapis_com_vpc_flows",
            SourceTableKind::GenericJsonLog => "generic_json_log",
        }
    }

    /// Inverse of [`Self::table_name`], for ingest entrypoints that read a
    /// table name off a raw record (`spec.md` §9: a closed enum, so an
    /// unrecognized name is an ingest-time error, never a silent passthrough).
    pub fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.table_name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_table_name_round_trips_every_known_table() {
        for kind in SourceTableKind::ALL {
            assert_eq!(SourceTableKind::from_table_name(kind.table_name()), Some(kind));
        }
    }

    #[test]
    fn from_table_name_rejects_unknown_tables() {
        assert_eq!(SourceTableKind::from_table_name("not_a_real_table"), None);
    }
}
