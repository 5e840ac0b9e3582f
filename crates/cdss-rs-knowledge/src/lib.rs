//! Clinical knowledge base: query normalization, record storage and tiered
//! retrieval for the consultation pipeline.

pub mod embedding;
pub mod error;
pub mod import;
pub mod model;
pub mod normalize;
pub mod retriever;
pub mod store;

/// Query embedding interface and implementations.
pub use embedding::{Embedder, HttpEmbedder, LazyEmbedder};
/// Knowledge error type.
pub use error::KnowledgeError;
/// Record and result models.
pub use model::{
    ClinicalRecord, GLOBAL_PRINCIPLES_ID, RecordMetadata, RetrievalResult, SearchParams,
};
/// Query normalization.
pub use normalize::{NormalizedQuery, normalize_query, normalize_query_with};
/// Tiered retrieval.
pub use retriever::{HybridRetriever, RetrievalReport, RetrievalTier, RetrieverSettings};
/// Knowledge store interface and SQLite implementation.
pub use store::{KnowledgeStore, ScoreWeights, SqliteKnowledgeStore};
