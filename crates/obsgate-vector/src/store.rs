use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{ffi::sqlite3_auto_extension, params, Connection, OptionalExtension};
use sqlite_vec::sqlite3_vec_init;
use tokio::sync::Mutex;

use crate::types::{
    cosine_similarity, ClusterDocument, ErrorEmbedding, CLUSTER_SIMILARITY_THRESHOLD,
    EMBEDDING_TTL_DAYS,
};

#[derive(Debug, thiserror::Error)]
pub enum VectorStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Outcome of [`VectorStore::upsert`].
#[derive(Debug, Clone)]
pub enum UpsertOutcome {
    JoinedCluster { cluster_id: String, similarity: f32 },
    NewCluster { cluster_id: String },
}

/// Backed by `rusqlite` + the `sqlite-vec` virtual table, per
/// `SPEC_FULL.md` §4.5a (grounded on `tandem-memory/src/db.rs`). Candidate
/// clusters are loaded from the last 7 days and scored in-process with
/// [`cosine_similarity`]; the vec0 virtual table carries the durable vector
/// storage the ETL/administration tooling inspects directly.
#[derive(Clone)]
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
    /// Per-cluster advisory lock: updates to the same cluster serialize,
    /// cross-cluster writes stay parallel (`spec.md` §4.5 Ordering).
    cluster_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    /// Held across the whole lookup-then-join-or-create decision in
    /// [`Self::upsert`], before any cluster candidate is read. A per-cluster
    /// lock can't close this window on its own: a brand-new cluster has no
    /// id to lock until after the decision is made, so two concurrent
    /// upserts for a new, similar error could otherwise both see "no match"
    /// and create duplicate clusters.
    decision_lock: Arc<Mutex<()>>,
    dimension: usize,
}

impl VectorStore {
    pub async fn open(path: &Path, dimension: usize) -> Result<Self, VectorStoreError> {
        unsafe {
            sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                unsafe extern "C" fn(
                    *mut rusqlite::ffi::sqlite3,
                    *mut *mut i8,
                    *const rusqlite::ffi::sqlite3_api_routines,
                ) -> i32,
            >(sqlite3_vec_init as *const ())));
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(10))?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            cluster_locks: Arc::new(Mutex::new(HashMap::new())),
            decision_lock: Arc::new(Mutex::new(())),
            dimension,
        };
        store.init_schema().await?;
        Ok(store)
    }

    pub async fn open_in_memory(dimension: usize) -> Result<Self, VectorStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            cluster_locks: Arc::new(Mutex::new(HashMap::new())),
            decision_lock: Arc::new(Mutex::new(())),
            dimension,
        };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), VectorStoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS error_embeddings (
                id TEXT PRIMARY KEY,
                vector_json TEXT NOT NULL,
                text TEXT NOT NULL,
                severity TEXT NOT NULL,
                service TEXT NOT NULL,
                ts TEXT NOT NULL,
                source_id TEXT NOT NULL,
                ttl_ts TEXT NOT NULL,
                cluster_id TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS error_clusters (
                cluster_id TEXT PRIMARY KEY,
                centroid_json TEXT NOT NULL,
                member_ids_json TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                last_seen TEXT NOT NULL,
                count INTEGER NOT NULL,
                representative_message TEXT NOT NULL
            )",
            [],
        )?;
        let _ = conn.execute(
            &format!(
                "CREATE VIRTUAL TABLE IF NOT EXISTS error_embedding_vectors USING vec0(
                    id TEXT PRIMARY KEY,
                    embedding float[{}]
                )",
                self.dimension
            ),
            [],
        );
        Ok(())
    }

    async fn lock_for_cluster(&self, cluster_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.cluster_locks.lock().await;
        locks
            .entry(cluster_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Loads cluster candidates with `last_seen >= now - 7d`.
    async fn recent_clusters(&self, now: DateTime<Utc>) -> Result<Vec<ClusterDocument>, VectorStoreError> {
        let cutoff = (now - Duration::days(EMBEDDING_TTL_DAYS)).to_rfc3339();
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT cluster_id, centroid_json, member_ids_json, first_seen, last_seen, count, representative_message
             FROM error_clusters WHERE last_seen >= ?1",
        )?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                let centroid_json: String = row.get(1)?;
                let member_ids_json: String = row.get(2)?;
                Ok((
                    row.get::<_, String>(0)?,
                    centroid_json,
                    member_ids_json,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, i64>(5)?,
                    row.get::<_, String>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut out = Vec::with_capacity(rows.len());
        for (cluster_id, centroid_json, member_ids_json, first_seen, last_seen, count, representative_message) in rows {
            out.push(ClusterDocument {
                cluster_id,
                centroid: serde_json::from_str(&centroid_json)?,
                member_ids: serde_json::from_str(&member_ids_json)?,
                first_seen: DateTime::parse_from_rfc3339(&first_seen)
                    .unwrap_or_default()
                    .with_timezone(&Utc),
                last_seen: DateTime::parse_from_rfc3339(&last_seen)
                    .unwrap_or_default()
                    .with_timezone(&Utc),
                count: count as u64,
                representative_message,
            });
        }
        Ok(out)
    }

    /// Upserts one embedding: finds the best matching recent cluster (cosine
    /// similarity >= 0.85); joins it, or creates a new one. The lookup and
    /// the decision it feeds are made under `decision_lock`, acquired before
    /// `recent_clusters` runs, so no second upsert can read the candidate
    /// set until this one has committed its join or create (`spec.md` §4.5
    /// step 3/Ordering — the advisory lock covers the whole update window,
    /// not just the write).
    pub async fn upsert(&self, embedding: ErrorEmbedding) -> Result<UpsertOutcome, VectorStoreError> {
        let _decision_guard = self.decision_lock.lock().await;
        let now = embedding.ts;
        let candidates = self.recent_clusters(now).await?;

        let mut best: Option<(String, f32)> = None;
        for cluster in &candidates {
            let similarity = cosine_similarity(&embedding.vector, &cluster.centroid);
            if similarity >= CLUSTER_SIMILARITY_THRESHOLD {
                if best.as_ref().map(|(_, s)| similarity > *s).unwrap_or(true) {
                    best = Some((cluster.cluster_id.clone(), similarity));
                }
            }
        }

        if let Some((cluster_id, similarity)) = best {
            let lock = self.lock_for_cluster(&cluster_id).await;
            let _guard = lock.lock().await;
            self.join_cluster(&cluster_id, &embedding).await?;
            Ok(UpsertOutcome::JoinedCluster {
                cluster_id,
                similarity,
            })
        } else {
            let cluster_id = uuid::Uuid::new_v4().to_string();
            let lock = self.lock_for_cluster(&cluster_id).await;
            let _guard = lock.lock().await;
            self.create_cluster(&cluster_id, &embedding).await?;
            Ok(UpsertOutcome::NewCluster { cluster_id })
        }
    }

    async fn join_cluster(
        &self,
        cluster_id: &str,
        embedding: &ErrorEmbedding,
    ) -> Result<(), VectorStoreError> {
        self.store_embedding(embedding, cluster_id).await?;

        let conn = self.conn.lock().await;
        let existing: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT centroid_json, member_ids_json, count FROM error_clusters WHERE cluster_id = ?1",
                params![cluster_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (centroid_json, member_ids_json, count) =
            existing.expect("cluster must exist before join_cluster is called");
        let mut centroid: Vec<f32> = serde_json::from_str(&centroid_json)?;
        let mut member_ids: Vec<String> = serde_json::from_str(&member_ids_json)?;

        // Running mean update of the centroid.
        let n = count as f32;
        for (c, v) in centroid.iter_mut().zip(&embedding.vector) {
            *c = (*c * n + v) / (n + 1.0);
        }
        member_ids.push(embedding.id.clone());

        conn.execute(
            "UPDATE error_clusters
             SET centroid_json = ?1, member_ids_json = ?2, count = count + 1, last_seen = ?3
             WHERE cluster_id = ?4",
            params![
                serde_json::to_string(&centroid)?,
                serde_json::to_string(&member_ids)?,
                embedding.ts.to_rfc3339(),
                cluster_id
            ],
        )?;
        Ok(())
    }

    async fn create_cluster(
        &self,
        cluster_id: &str,
        embedding: &ErrorEmbedding,
    ) -> Result<(), VectorStoreError> {
        self.store_embedding(embedding, cluster_id).await?;

        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO error_clusters
             (cluster_id, centroid_json, member_ids_json, first_seen, last_seen, count, representative_message)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
                cluster_id,
                serde_json::to_string(&embedding.vector)?,
                serde_json::to_string(&vec![embedding.id.clone()])?,
                embedding.ts.to_rfc3339(),
                embedding.ts.to_rfc3339(),
                embedding.text,
            ],
        )?;
        Ok(())
    }

    async fn store_embedding(
        &self,
        embedding: &ErrorEmbedding,
        cluster_id: &str,
    ) -> Result<(), VectorStoreError> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT OR REPLACE INTO error_embeddings
             (id, vector_json, text, severity, service, ts, source_id, ttl_ts, cluster_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                embedding.id,
                serde_json::to_string(&embedding.vector)?,
                embedding.text,
                embedding.severity.as_str(),
                embedding.service,
                embedding.ts.to_rfc3339(),
                embedding.source_id,
                embedding.ttl_ts.to_rfc3339(),
                cluster_id,
            ],
        )?;
        let _ = conn.execute(
            "INSERT OR REPLACE INTO error_embedding_vectors (id, embedding) VALUES (?1, ?2)",
            params![embedding.id, serde_json::to_string(&embedding.vector)?],
        );
        Ok(())
    }

    /// Returns the `k` clusters whose centroid is nearest the query vector,
    /// for the `similar_errors` tool (`spec.md` §4.6).
    pub async fn nearest_clusters(
        &self,
        query_vector: &[f32],
        k: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<(ClusterDocument, f32)>, VectorStoreError> {
        let mut scored: Vec<(ClusterDocument, f32)> = self
            .recent_clusters(now)
            .await?
            .into_iter()
            .map(|cluster| {
                let sim = cosine_similarity(query_vector, &cluster.centroid);
                (cluster, sim)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    /// Drops points past their TTL (`spec.md` §4.5 step 4).
    pub async fn reap_expired(&self, now: DateTime<Utc>) -> Result<u64, VectorStoreError> {
        let conn = self.conn.lock().await;
        let deleted = conn.execute(
            "DELETE FROM error_embeddings WHERE ttl_ts < ?1",
            params![now.to_rfc3339()],
        )?;
        let _ = conn.execute(
            "DELETE FROM error_embedding_vectors WHERE id NOT IN (SELECT id FROM error_embeddings)",
            [],
        );
        Ok(deleted as u64)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsgate_contract::Severity;

    fn embedding(id: &str, vector: Vec<f32>, ts: DateTime<Utc>) -> ErrorEmbedding {
        ErrorEmbedding {
            id: id.to_string(),
            vector,
            text: format!("ERROR | svc | {id}"),
            severity: Severity::Error,
            service: "svc".to_string(),
            ts,
            source_id: id.to_string(),
            ttl_ts: ts + Duration::days(EMBEDDING_TTL_DAYS),
        }
    }

    #[tokio::test]
    async fn first_embedding_creates_a_new_cluster() {
        let store = VectorStore::open_in_memory(4).await.unwrap();
        let now = Utc::now();
        let outcome = store
            .upsert(embedding("e1", vec![1.0, 0.0, 0.0, 0.0], now))
            .await
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::NewCluster { .. }));
    }

    #[tokio::test]
    async fn similar_embedding_joins_existing_cluster() {
        let store = VectorStore::open_in_memory(4).await.unwrap();
        let now = Utc::now();
        store
            .upsert(embedding("e1", vec![1.0, 0.0, 0.0, 0.0], now))
            .await
            .unwrap();
        let outcome = store
            .upsert(embedding("e2", vec![0.99, 0.01, 0.0, 0.0], now))
            .await
            .unwrap();
        match outcome {
            UpsertOutcome::JoinedCluster { similarity, .. } => {
                assert!(similarity >= CLUSTER_SIMILARITY_THRESHOLD)
            }
            UpsertOutcome::NewCluster { .. } => panic!("expected a joined cluster"),
        }
    }

    #[tokio::test]
    async fn dissimilar_embedding_creates_a_separate_cluster() {
        let store = VectorStore::open_in_memory(4).await.unwrap();
        let now = Utc::now();
        store
            .upsert(embedding("e1", vec![1.0, 0.0, 0.0, 0.0], now))
            .await
            .unwrap();
        let outcome = store
            .upsert(embedding("e2", vec![0.0, 1.0, 0.0, 0.0], now))
            .await
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::NewCluster { .. }));
    }

    #[tokio::test]
    async fn clusters_older_than_seven_days_are_not_matched() {
        let store = VectorStore::open_in_memory(4).await.unwrap();
        let old = Utc::now() - Duration::days(10);
        store
            .upsert(embedding("e1", vec![1.0, 0.0, 0.0, 0.0], old))
            .await
            .unwrap();
        let outcome = store
            .upsert(embedding("e2", vec![1.0, 0.0, 0.0, 0.0], Utc::now()))
            .await
            .unwrap();
        assert!(matches!(outcome, UpsertOutcome::NewCluster { .. }));
    }

    #[tokio::test]
    async fn reaper_drops_points_past_ttl() {
        let store = VectorStore::open_in_memory(4).await.unwrap();
        let old = Utc::now() - Duration::days(10);
        store
            .upsert(embedding("e1", vec![1.0, 0.0, 0.0, 0.0], old))
            .await
            .unwrap();
        let deleted = store.reap_expired(Utc::now()).await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn nearest_clusters_orders_by_similarity_desc() {
        let store = VectorStore::open_in_memory(4).await.unwrap();
        let now = Utc::now();
        store
            .upsert(embedding("e1", vec![1.0, 0.0, 0.0, 0.0], now))
            .await
            .unwrap();
        store
            .upsert(embedding("e2", vec![0.0, 1.0, 0.0, 0.0], now))
            .await
            .unwrap();
        let results = store
            .nearest_clusters(&[1.0, 0.1, 0.0, 0.0], 2, now)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].1 >= results[1].1);
    }
}
