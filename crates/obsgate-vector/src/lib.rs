mod embeddings;
mod store;
mod types;

pub use embeddings::{Embedder, EmbeddingError, HashEmbedder};
#[cfg(feature = "local-embeddings")]
pub use embeddings::FastEmbedEmbedder;
pub use store::{UpsertOutcome, VectorStore, VectorStoreError};
pub use types::{
    cosine_similarity, embedding_text, ClusterDocument, ErrorEmbedding,
    CLUSTER_SIMILARITY_THRESHOLD, DEFAULT_EMBEDDING_DIMENSION, EMBEDDING_TTL_DAYS,
};
