use chrono::{DateTime, Utc};
use obsgate_contract::Severity;
use serde::{Deserialize, Serialize};

pub const DEFAULT_EMBEDDING_DIMENSION: usize = 384;
pub const EMBEDDING_TTL_DAYS: i64 = 7;
/// Cluster membership threshold (`spec.md` §4.5).
pub const CLUSTER_SIMILARITY_THRESHOLD: f32 = 0.85;

/// Mirrors `spec.md` §3 ErrorEmbedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEmbedding {
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub severity: Severity,
    pub service: String,
    pub ts: DateTime<Utc>,
    pub source_id: String,
    pub ttl_ts: DateTime<Utc>,
}

/// A group of semantically similar error messages (`spec.md` Glossary).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterDocument {
    pub cluster_id: String,
    pub centroid: Vec<f32>,
    pub member_ids: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub count: u64,
    pub representative_message: String,
}

/// `"{severity} | {service} | {message-truncated}"`, per `spec.md` §4.5 step 1.
pub fn embedding_text(severity: Severity, service: &str, message: &str) -> String {
    const MAX_MESSAGE_CHARS: usize = 200;
    let truncated: String = message.chars().take(MAX_MESSAGE_CHARS).collect();
    format!("{severity} | {service} | {truncated}")
}

/// Cosine similarity between two equal-length dense vectors, in `[-1.0,
/// 1.0]`. Returns `0.0` for a zero vector (no direction to compare) rather
/// than dividing by zero.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn embedding_text_truncates_long_messages() {
        let long = "x".repeat(500);
        let text = embedding_text(Severity::Error, "svc", &long);
        assert!(text.len() < 500);
        assert!(text.starts_with("ERROR | svc | "));
    }
}
