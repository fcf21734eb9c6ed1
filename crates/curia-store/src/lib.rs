//! # curia-store
//!
//! Conversation persistence for Curia, backed by SQLite.
//!
//! Everything lives in one `documents` table partitioned by caller with a
//! `doc_type` discriminator (`session | cache | embedding | feedback`) --
//! the routing stays inside this crate; the core never branches on
//! document types.  On top of it:
//!
//! - [`SessionStore`] -- sessions and atomically-appended turns with
//!   strictly increasing turn numbers and a retention cap.
//! - [`QueryCache`] / [`EmbeddingCache`] -- TTL caches whose reads never
//!   block the request path (errors degrade to a miss).
//! - [`FeedbackStore`] -- per-turn feedback records.
//! - [`ChunkIndex`] -- the read-only view of the ingestion pipeline's
//!   chunks, with an embedded SQLite implementation.

pub mod cache;
pub mod chunks;
pub mod db;
pub mod documents;
pub mod error;
pub mod feedback;
pub mod migration;
pub mod session;

// ── re-exports ───────────────────────────────────────────────────────

pub use cache::{CacheScope, EmbeddingCache, QueryCache, cache_key};
pub use chunks::{Chunk, ChunkFilters, ChunkIndex, ScoredChunk, SqliteChunkIndex};
pub use db::Database;
pub use documents::{DocumentStore, SYSTEM_PARTITION};
pub use error::{StoreError, StoreResult};
pub use feedback::{FeedbackRecord, FeedbackStore};
pub use session::{NewTurn, Session, SessionStore, Turn};
