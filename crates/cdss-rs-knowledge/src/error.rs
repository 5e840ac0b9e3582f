//! Error types for knowledge base operations.

/// Errors returned by knowledge stores, embedders and importers.
#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Embedding endpoint failure.
    #[error("embedding error: {0}")]
    Embedding(String),
    /// Stored embedding blob could not be decoded.
    #[error("invalid embedding blob for record {record_id}: {len} bytes")]
    InvalidEmbedding { record_id: String, len: usize },
    /// Stored record row is malformed.
    #[error("invalid record {record_id}: {message}")]
    InvalidRecord { record_id: String, message: String },
}
