use sha2::{Digest, Sha256};

use crate::types::DEFAULT_EMBEDDING_DIMENSION;

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
}

/// Grounded in the teacher's `EmbeddingService` (`tandem-memory/src/embeddings.rs`):
/// a small trait so the dense-vector model can be swapped or stubbed in tests
/// without touching the cluster logic.
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Deterministic, dependency-free embedder used in tests and whenever the
/// `local-embeddings` feature is off. Not semantically meaningful, but
/// stable: the same text always yields the same vector, which is all the
/// cluster-upsert tests need.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HashEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimension];
        let mut seed = Sha256::digest(text.as_bytes());
        for chunk_start in (0..self.dimension).step_by(32) {
            for (i, byte) in seed.iter().enumerate() {
                if chunk_start + i >= self.dimension {
                    break;
                }
                // Map byte -> roughly [-1, 1].
                vector[chunk_start + i] = (*byte as f32 / 127.5) - 1.0;
            }
            seed = Sha256::digest(&seed[..]);
        }
        Ok(vector)
    }
}

#[cfg(feature = "local-embeddings")]
pub struct FastEmbedEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    dimension: usize,
}

#[cfg(feature = "local-embeddings")]
impl FastEmbedEmbedder {
    pub fn try_new() -> Result<Self, EmbeddingError> {
        let options = fastembed::InitOptions::new(fastembed::EmbeddingModel::AllMiniLML6V2);
        let model = fastembed::TextEmbedding::try_new(options)
            .map_err(|err| EmbeddingError::Unavailable(err.to_string()))?;
        Ok(Self {
            model: std::sync::Mutex::new(model),
            dimension: DEFAULT_EMBEDDING_DIMENSION,
        })
    }
}

#[cfg(feature = "local-embeddings")]
impl Embedder for FastEmbedEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbeddingError::Unavailable("embedding model lock poisoned".into()))?;
        let embeddings = model
            .embed(vec![text.to_string()], None)
            .map_err(|err| EmbeddingError::Unavailable(err.to_string()))?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Unavailable("empty embedding batch".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_embedder_is_deterministic() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("connection refused").unwrap();
        let b = embedder.embed("connection refused").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_embedder_differs_for_different_text() {
        let embedder = HashEmbedder::new();
        let a = embedder.embed("connection refused").unwrap();
        let b = embedder.embed("disk full").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn hash_embedder_produces_the_configured_dimension() {
        let embedder = HashEmbedder::new();
        assert_eq!(embedder.embed("x").unwrap().len(), embedder.dimension());
    }
}
