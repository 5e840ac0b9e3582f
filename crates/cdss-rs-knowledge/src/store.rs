//! Knowledge store abstraction and the SQLite-backed implementation.

use crate::error::KnowledgeError;
use crate::model::{
    ClinicalRecord, GLOBAL_PRINCIPLES_ID, RecordMetadata, RetrievalResult, SearchParams,
};
use async_trait::async_trait;
use cdss_rs_protocol::RecordSource;
use log::{debug, info};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::path::Path;
use std::sync::Arc;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS clinical_records (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL,
    embedding BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_clinical_records_source ON clinical_records(source);
";

#[async_trait]
/// Search interface consumed by the hybrid retriever.
pub trait KnowledgeStore: Send + Sync {
    /// Hybrid vector + lexical search; results score strictly above the threshold.
    async fn similarity_search(
        &self,
        params: &SearchParams,
    ) -> Result<Vec<RetrievalResult>, KnowledgeError>;

    /// Case-insensitive substring match of `keyword` against record content.
    async fn keyword_search(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<RetrievalResult>, KnowledgeError>;

    /// Global principles rendered into every prompt; none by default.
    async fn principles(&self) -> Result<Vec<String>, KnowledgeError> {
        Ok(Vec::new())
    }
}

/// Relative weights of the two hybrid score components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub vector: f32,
    pub text: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            text: 0.3,
        }
    }
}

/// SQLite knowledge base holding records and their f32 embeddings.
#[derive(Clone)]
pub struct SqliteKnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    weights: ScoreWeights,
}

impl SqliteKnowledgeStore {
    /// Open or create the store at the provided path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, KnowledgeError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        info!("opened knowledge store (path={})", path.display());
        Self::with_connection(conn)
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self, KnowledgeError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, KnowledgeError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            weights: ScoreWeights::default(),
        })
    }

    /// Override the hybrid score weights.
    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Insert or replace records, keyed by record id.
    pub fn upsert_records(&self, records: &[ClinicalRecord]) -> Result<usize, KnowledgeError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        insert_records(&tx, records)?;
        tx.commit()?;
        info!("upserted clinical records (count={})", records.len());
        Ok(records.len())
    }

    /// Drop every record of `sources` and insert `records` in one transaction.
    ///
    /// Returns the number of rows removed. On error nothing is changed.
    pub fn replace_sources(
        &self,
        sources: &[RecordSource],
        records: &[ClinicalRecord],
    ) -> Result<usize, KnowledgeError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        for source in sources {
            removed += tx.execute(
                "DELETE FROM clinical_records WHERE source = ?1",
                params![source.as_str()],
            )?;
        }
        insert_records(&tx, records)?;
        tx.commit()?;
        info!(
            "replaced clinical records (removed={}, inserted={})",
            removed,
            records.len()
        );
        Ok(removed)
    }

    /// Remove every record of one collection.
    pub fn clear_source(&self, source: RecordSource) -> Result<usize, KnowledgeError> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM clinical_records WHERE source = ?1",
            params![source.as_str()],
        )?;
        debug!("cleared records (source={}, removed={})", source, removed);
        Ok(removed)
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<usize, KnowledgeError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM clinical_records", [], |row| {
            row.get(0)
        })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Load every record ordered by id.
    pub fn load_records(&self) -> Result<Vec<ClinicalRecord>, KnowledgeError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, source, content, metadata, embedding FROM clinical_records ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Vec<u8>>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, source, content, metadata, blob) = row?;
            let source = RecordSource::parse(&source).ok_or_else(|| {
                KnowledgeError::InvalidRecord {
                    record_id: id.clone(),
                    message: format!("unknown source {source}"),
                }
            })?;
            let metadata: RecordMetadata = serde_json::from_str(&metadata)?;
            let embedding = decode_embedding(&id, &blob)?;
            records.push(ClinicalRecord {
                id,
                source,
                content,
                metadata,
                embedding,
            });
        }
        Ok(records)
    }

    fn load_principles(&self) -> Result<Vec<String>, KnowledgeError> {
        let conn = self.conn.lock();
        let metadata: Option<String> = conn
            .query_row(
                "SELECT metadata FROM clinical_records WHERE id = ?1",
                params![GLOBAL_PRINCIPLES_ID],
                |row| row.get(0),
            )
            .optional()?;
        let Some(metadata) = metadata else {
            return Ok(Vec::new());
        };
        let record = ClinicalRecord {
            id: GLOBAL_PRINCIPLES_ID.to_string(),
            source: RecordSource::Rule,
            content: String::new(),
            metadata: serde_json::from_str(&metadata)?,
            embedding: Vec::new(),
        };
        Ok(record.principle_lines())
    }

    fn hybrid_score(&self, record: &ClinicalRecord, embedding: &[f32], terms: &[&str]) -> f32 {
        let vector = cosine_similarity(embedding, &record.embedding).unwrap_or(0.0) as f32;
        let text = lexical_rank(&record.content, terms);
        self.weights.vector * vector + self.weights.text * text
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    async fn similarity_search(
        &self,
        params: &SearchParams,
    ) -> Result<Vec<RetrievalResult>, KnowledgeError> {
        let terms: Vec<&str> = params.text.split_whitespace().collect();
        let mut scored: Vec<RetrievalResult> = self
            .load_records()?
            .iter()
            .filter(|record| !record.is_principles())
            .filter_map(|record| {
                let score = self.hybrid_score(record, &params.embedding, &terms);
                (score > params.threshold).then(|| record.to_result(score))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        scored.truncate(params.count);
        debug!(
            "similarity search (terms={}, threshold={}, returned={})",
            terms.len(),
            params.threshold,
            scored.len()
        );
        Ok(scored)
    }

    async fn keyword_search(
        &self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<RetrievalResult>, KnowledgeError> {
        let needle = keyword.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let matches: Vec<RetrievalResult> = self
            .load_records()?
            .iter()
            .filter(|record| !record.is_principles())
            .filter(|record| record.content.to_lowercase().contains(&needle))
            .take(limit)
            .map(|record| record.to_result(0.0))
            .collect();
        debug!(
            "keyword search (keyword_len={}, returned={})",
            needle.len(),
            matches.len()
        );
        Ok(matches)
    }

    async fn principles(&self) -> Result<Vec<String>, KnowledgeError> {
        self.load_principles()
    }
}

fn insert_records(tx: &Transaction<'_>, records: &[ClinicalRecord]) -> Result<(), KnowledgeError> {
    let mut stmt = tx.prepare(
        "INSERT OR REPLACE INTO clinical_records (id, source, content, metadata, embedding)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for record in records {
        if record.id.trim().is_empty() {
            return Err(KnowledgeError::InvalidRecord {
                record_id: record.id.clone(),
                message: "record id is blank".to_string(),
            });
        }
        let metadata = serde_json::to_string(&record.metadata)?;
        stmt.execute(params![
            record.id,
            record.source.as_str(),
            record.content,
            metadata,
            encode_embedding(&record.embedding),
        ])?;
    }
    Ok(())
}

/// Fraction of search terms contained in the lower-cased content.
fn lexical_rank(content: &str, terms: &[&str]) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let haystack = content.to_lowercase();
    let hits = terms
        .iter()
        .filter(|term| haystack.contains(&term.to_lowercase()))
        .count();
    hits as f32 / terms.len() as f32
}

/// Cosine similarity; None for empty, mismatched or zero-norm vectors.
fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f64::EPSILON {
        return None;
    }
    Some(dot / denom)
}

fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(record_id: &str, blob: &[u8]) -> Result<Vec<f32>, KnowledgeError> {
    if blob.len() % 4 != 0 {
        return Err(KnowledgeError::InvalidEmbedding {
            record_id: record_id.to_string(),
            len: blob.len(),
        });
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}
