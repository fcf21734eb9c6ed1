//! Read-only view of the ingestion pipeline's output.
//!
//! The crawl/extract/chunk/embed pipeline lives outside this system; the
//! core only reads what it produced.  [`ChunkIndex`] is the contract,
//! [`SqliteChunkIndex`] the embedded implementation (the pipeline upserts
//! rows into the `chunks` table out of band).

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One indexed text chunk with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique chunk id.
    pub chunk_id: String,
    /// Source document id.
    pub document_id: String,
    /// Origin label (site, library, connector name).
    #[serde(default)]
    pub source: String,
    /// Extracted text.
    pub text: String,
    /// Arbitrary metadata from the pipeline.
    #[serde(default)]
    pub metadata: Value,
    /// Embedding vector.
    pub embedding: Vec<f32>,
}

/// Filters applied during a vector search.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilters {
    /// Restrict to chunks of one document.
    pub document_id: Option<String>,
    /// Restrict to one origin.
    pub source: Option<String>,
}

/// A chunk with its similarity score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// The matching chunk.
    pub chunk: Chunk,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Read-only chunk access as seen by the core.
#[async_trait]
pub trait ChunkIndex: Send + Sync {
    /// Fetch one chunk by id.
    async fn get_chunk(&self, chunk_id: &str) -> StoreResult<Option<Chunk>>;

    /// Nearest chunks to `query_vector` under the filters, best first.
    async fn search_chunks(
        &self,
        query_vector: &[f32],
        filters: &ChunkFilters,
        top_k: usize,
    ) -> StoreResult<Vec<ScoredChunk>>;
}

/// Cosine similarity of two dense vectors; zero-length input scores 0.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

/// Chunk index over the store's `chunks` table.
#[derive(Clone)]
pub struct SqliteChunkIndex {
    db: Database,
}

impl SqliteChunkIndex {
    /// Create an index over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Upsert one chunk.  Called by the ingestion pipeline (and tests);
    /// the core never writes chunks.
    pub async fn upsert_chunk(&self, chunk: Chunk) -> StoreResult<()> {
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO chunks (chunk_id, document_id, source, text, metadata, embedding, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(chunk_id) DO UPDATE SET \
                       document_id = excluded.document_id, \
                       source = excluded.source, \
                       text = excluded.text, \
                       metadata = excluded.metadata, \
                       embedding = excluded.embedding, \
                       updated_at = excluded.updated_at",
                    rusqlite::params![
                        chunk.chunk_id,
                        chunk.document_id,
                        chunk.source,
                        chunk.text,
                        serde_json::to_string(&chunk.metadata)?,
                        serde_json::to_string(&chunk.embedding)?,
                        now
                    ],
                )?;
                Ok(())
            })
            .await
    }
}

fn row_to_chunk(row: &rusqlite::Row<'_>) -> Result<Chunk, rusqlite::Error> {
    let metadata: String = row.get(4)?;
    let embedding: String = row.get(5)?;
    Ok(Chunk {
        chunk_id: row.get(0)?,
        document_id: row.get(1)?,
        source: row.get(2)?,
        text: row.get(3)?,
        metadata: serde_json::from_str(&metadata).unwrap_or(Value::Null),
        embedding: serde_json::from_str(&embedding).unwrap_or_default(),
    })
}

#[async_trait]
impl ChunkIndex for SqliteChunkIndex {
    async fn get_chunk(&self, chunk_id: &str) -> StoreResult<Option<Chunk>> {
        let chunk_id = chunk_id.to_owned();
        self.db
            .execute(move |conn| {
                match conn.query_row(
                    "SELECT chunk_id, document_id, source, text, metadata, embedding \
                     FROM chunks WHERE chunk_id = ?1",
                    rusqlite::params![chunk_id],
                    |row| row_to_chunk(row),
                ) {
                    Ok(chunk) => Ok(Some(chunk)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(StoreError::Sqlite(e)),
                }
            })
            .await
    }

    async fn search_chunks(
        &self,
        query_vector: &[f32],
        filters: &ChunkFilters,
        top_k: usize,
    ) -> StoreResult<Vec<ScoredChunk>> {
        let query_vector = query_vector.to_vec();
        let document_id = filters.document_id.clone();
        let source = filters.source.clone();

        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT chunk_id, document_id, source, text, metadata, embedding \
                     FROM chunks \
                     WHERE (?1 IS NULL OR document_id = ?1) \
                       AND (?2 IS NULL OR source = ?2)",
                )?;
                let chunks = stmt
                    .query_map(rusqlite::params![document_id, source], row_to_chunk)?
                    .collect::<Result<Vec<Chunk>, _>>()?;

                let mut scored: Vec<ScoredChunk> = chunks
                    .into_iter()
                    .map(|chunk| {
                        let score = cosine(&query_vector, &chunk.embedding);
                        ScoredChunk { chunk, score }
                    })
                    .collect();
                scored.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                scored.truncate(top_k);
                Ok(scored)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
