use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use obsgate_contract::CanonicalLogRow;
use obsgate_costguard::{Estimator, EstimatorUnreachable};
use obsgate_planner::PlannedQuery;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

/// Average on-disk bytes per canonical row, used only by the estimator
/// heuristic below — a physical column store would report this from its own
/// statistics, but the SQLite-backed fact table here has no such catalog.
const AVG_ROW_BYTES: u64 = 900;

#[derive(Debug, thiserror::Error)]
pub enum FactStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Stand-in for the partitioned/clustered column store `canonical_log_view`
/// unions over (`spec.md` §4.1). Every query the Tool Runtime runs goes
/// through here, never through a source table. Physical storage is a single
/// SQLite table with indexed filter columns plus a JSON blob carrying the
/// full row, so planner-emitted SQL (filter predicates, `GROUP BY`) can run
/// directly against it while `execute_list` still returns full rows.
#[derive(Clone)]
pub struct FactStore {
    conn: Arc<Mutex<Connection>>,
}

impl FactStore {
    pub async fn open_in_memory() -> Result<Self, FactStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn).await
    }

    /// Opens (creating if absent) a durable fact store on disk, for the
    /// `etl` CLI subcommand — the in-memory constructor above is for tests
    /// and the HTTP server's own process lifetime.
    pub async fn open(path: &std::path::Path) -> Result<Self, FactStoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        Self::from_connection(conn).await
    }

    async fn from_connection(conn: Connection) -> Result<Self, FactStoreError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS canonical_log_view (
                log_id TEXT NOT NULL,
                event_ts TEXT NOT NULL,
                severity TEXT NOT NULL,
                severity_level INTEGER NOT NULL,
                service_name TEXT NOT NULL,
                source_table TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                trace_id TEXT,
                message TEXT NOT NULL,
                display_message TEXT NOT NULL,
                row_json TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_canonical_log_view_event_ts ON canonical_log_view(event_ts)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_canonical_log_view_trace_id ON canonical_log_view(trace_id)",
            [],
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn insert(&self, row: &CanonicalLogRow) -> Result<(), FactStoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO canonical_log_view
             (log_id, event_ts, severity, severity_level, service_name, source_table,
              resource_type, trace_id, message, display_message, row_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10)",
            params![
                row.log_id,
                row.event_ts.to_rfc3339(),
                row.severity.as_str(),
                row.severity_level() as i64,
                row.service_name,
                row.source_table,
                row.resource_type,
                row.trace_id,
                row.message,
                serde_json::to_string(row)?,
            ],
        )?;
        Ok(())
    }

    /// Runs a `build_list`-shaped [`PlannedQuery`] and reconstructs full rows.
    pub async fn execute_list(
        &self,
        plan: &PlannedQuery,
    ) -> Result<Vec<CanonicalLogRow>, FactStoreError> {
        let sql = plan
            .sql_template
            .replacen("SELECT *", "SELECT row_json", 1);
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let bind_pairs = plan.bind_pairs();
        let rows = stmt
            .query_map(bind_pairs.as_slice(), |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|json| Ok(serde_json::from_str(&json)?))
            .collect()
    }

    /// Runs a `build_aggregate`-shaped [`PlannedQuery`]; returns `(key, count)`.
    pub async fn execute_aggregate(
        &self,
        plan: &PlannedQuery,
    ) -> Result<Vec<(String, i64)>, FactStoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&plan.sql_template)?;
        let bind_pairs = plan.bind_pairs();
        let rows = stmt
            .query_map(bind_pairs.as_slice(), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// `trace_lookup(trace_id)`: rows ordered by `event_ts` ascending
    /// (`spec.md` §4.6), bypassing the planner entirely since it is keyed
    /// solely on `trace_id`.
    pub async fn trace_lookup(
        &self,
        trace_id: &str,
    ) -> Result<Vec<CanonicalLogRow>, FactStoreError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT row_json FROM canonical_log_view WHERE trace_id = ?1 ORDER BY event_ts ASC",
        )?;
        let rows = stmt
            .query_map(params![trace_id], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|json| Ok(serde_json::from_str(&json)?))
            .collect()
    }

    /// Used by `similar_errors(row_id, k)` to recover the message/service
    /// context of a row the caller only referenced by id.
    pub async fn get_by_log_id(
        &self,
        log_id: &str,
    ) -> Result<Option<CanonicalLogRow>, FactStoreError> {
        let conn = self.conn.lock().await;
        let row: Option<String> = conn
            .query_row(
                "SELECT row_json FROM canonical_log_view WHERE log_id = ?1",
                params![log_id],
                |row| row.get(0),
            )
            .optional()?;
        row.map(|json| Ok(serde_json::from_str(&json)?)).transpose()
    }

    async fn count_matching(&self, plan: &PlannedQuery) -> Result<u64, FactStoreError> {
        let count_sql = {
            let from_idx = plan
                .sql_template
                .find(" FROM ")
                .expect("planner output always contains FROM");
            let where_clause = &plan.sql_template[from_idx..];
            let where_clause = where_clause
                .split(" ORDER BY ")
                .next()
                .unwrap_or(where_clause)
                .split(" GROUP BY ")
                .next()
                .unwrap_or(where_clause);
            format!("SELECT COUNT(*){where_clause}")
        };
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&count_sql)?;
        let bind_pairs: Vec<(&str, &dyn rusqlite::ToSql)> = plan
            .parameter_map
            .iter()
            .filter(|(name, _)| name != ":limit")
            .map(|(name, value)| (name.as_str(), value as &dyn rusqlite::ToSql))
            .collect();
        let count: i64 = stmt.query_row(bind_pairs.as_slice(), |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// [`Estimator`] backed by a real row count against the fact store: a
/// heuristic stand-in for a column store's partition/byte statistics.
pub struct FactStoreEstimator {
    store: FactStore,
}

impl FactStoreEstimator {
    pub fn new(store: FactStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Estimator for FactStoreEstimator {
    async fn estimate_bytes_scanned(
        &self,
        plan: &PlannedQuery,
    ) -> Result<u64, EstimatorUnreachable> {
        let count = self
            .store
            .count_matching(plan)
            .await
            .map_err(|err| EstimatorUnreachable(err.to_string()))?;
        Ok(count * AVG_ROW_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsgate_contract::{
        Actor, Correlation, Envelope, PiiRisk, Privacy, RedactionState, RetentionClass, Severity,
        Versioning, CONTRACT_SCHEMA_VERSION,
    };
    use obsgate_planner::{build_list, LogQueryRequest};

    fn sample_row(log_id: &str, service: &str, trace_id: Option<&str>) -> CanonicalLogRow {
        CanonicalLogRow {
            log_id: log_id.to_string(),
            event_ts: Utc::now(),
            ingest_ts: Utc::now(),
            severity: Severity::Error,
            service_name: service.to_string(),
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
            trace_id: trace_id.map(ToString::to_string),
            span_id: None,
            parent_span_id: None,
            trace_sampled: false,
            envelope: Envelope {
                schema_version: CONTRACT_SCHEMA_VERSION.to_string(),
                environment: "prod".into(),
                actor: Actor::default(),
                correlation: Correlation::default(),
                privacy: Privacy {
                    pii_risk: PiiRisk::None,
                    redaction_state: RedactionState::Unredacted,
                    retention_class: RetentionClass::Standard,
                },
                versioning: Versioning::default(),
                labels: vec![],
            },
            is_error: true,
            is_audit: false,
            is_request: true,
            has_trace: trace_id.is_some(),
        }
    }

    #[tokio::test]
    async fn insert_then_list_round_trips() {
        let store = FactStore::open_in_memory().await.unwrap();
        store.insert(&sample_row("r1", "checkout", None)).await.unwrap();
        let req = LogQueryRequest::new(Some(24), Some(10), None, None, None, None, None).unwrap();
        let plan = build_list(&req);
        let rows = store.execute_list(&plan).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].log_id, "r1");
    }

    #[tokio::test]
    async fn open_on_disk_persists_rows_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("facts.sqlite");
        {
            let store = FactStore::open(&path).await.unwrap();
            store.insert(&sample_row("r1", "checkout", None)).await.unwrap();
        }
        let reopened = FactStore::open(&path).await.unwrap();
        let row = reopened.get_by_log_id("r1").await.unwrap();
        assert!(row.is_some());
    }

    #[tokio::test]
    async fn trace_lookup_orders_by_event_ts_asc() {
        let store = FactStore::open_in_memory().await.unwrap();
        store.insert(&sample_row("r1", "a", Some("tr1"))).await.unwrap();
        store.insert(&sample_row("r2", "a", Some("tr1"))).await.unwrap();
        let rows = store.trace_lookup("tr1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].event_ts <= rows[1].event_ts);
    }

    #[tokio::test]
    async fn estimator_reports_nonzero_bytes_for_matching_rows() {
        let store = FactStore::open_in_memory().await.unwrap();
        store.insert(&sample_row("r1", "checkout", None)).await.unwrap();
        let estimator = FactStoreEstimator::new(store.clone());
        let req = LogQueryRequest::new(Some(24), Some(10), None, None, None, None, None).unwrap();
        let plan = build_list(&req);
        let bytes = estimator.estimate_bytes_scanned(&plan).await.unwrap();
        assert_eq!(bytes, AVG_ROW_BYTES);
    }
}
