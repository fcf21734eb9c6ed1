//! Query-result and embedding caches.
//!
//! Keys are deterministic SHA-256 digests over the normalized query text,
//! the caller, the tenant, the sorted role list, and the query type.  The
//! `cache_scope` knob controls whether roles participate in the key.
//!
//! Contract: cache reads never block orchestration.  Backend errors are
//! logged at warn level and reported as a miss, and the request proceeds.
//! A moka layer in front of the durable rows absorbs hot keys.

use moka::future::Cache;
use ring::digest;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::Database;
use crate::documents::{DocumentStore, SYSTEM_PARTITION};

/// Hot-layer TTL; durable rows honor the caller-supplied TTL exactly.
const HOT_TTL_SECS: u64 = 300;

/// Whether role membership participates in cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheScope {
    /// Key on caller only; a role change can hit older entries.
    Caller,
    /// Key on caller + sorted roles; a role change misses (default).
    #[default]
    CallerRoles,
}

/// Hex SHA-256 digest of the given segments.
fn digest_hex(segments: &[&str]) -> String {
    let mut ctx = digest::Context::new(&digest::SHA256);
    for segment in segments {
        ctx.update(segment.as_bytes());
        ctx.update(b"\x1f");
    }
    let digest = ctx.finish();
    digest
        .as_ref()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Deterministic cache key for a query result.
#[must_use]
pub fn cache_key(
    query: &str,
    caller_id: &str,
    tenant_id: &str,
    roles: &[String],
    query_type: &str,
    scope: CacheScope,
) -> String {
    let normalized = query.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ");
    let mut sorted_roles = roles.to_vec();
    sorted_roles.sort();
    let roles_segment = match scope {
        CacheScope::Caller => String::new(),
        CacheScope::CallerRoles => sorted_roles.join(","),
    };

    let digest = digest_hex(&[&normalized, caller_id, tenant_id, &roles_segment, query_type]);
    format!("query:{query_type}:{digest}")
}

// ---------------------------------------------------------------------------
// Query cache
// ---------------------------------------------------------------------------

/// TTL cache for computed query results, partitioned by caller.
#[derive(Clone)]
pub struct QueryCache {
    docs: DocumentStore,
    hot: Cache<String, Value>,
}

impl QueryCache {
    /// Create a query cache over `db`.
    pub fn new(db: Database) -> Self {
        Self {
            docs: DocumentStore::new(db),
            hot: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(std::time::Duration::from_secs(HOT_TTL_SECS))
                .build(),
        }
    }

    /// Look up a cached value.  Never fails: backend errors are a miss.
    pub async fn get(&self, caller_id: &str, key: &str) -> Option<Value> {
        let hot_key = format!("{caller_id}:{key}");
        if let Some(value) = self.hot.get(&hot_key).await {
            tracing::debug!(key, "query cache hit (hot)");
            return Some(value);
        }

        match self.docs.get(caller_id, key).await {
            Ok(Some(value)) => {
                tracing::debug!(key, "query cache hit");
                self.hot.insert(hot_key, value.clone()).await;
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "query cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a value with a TTL.  Never fails: backend errors are logged
    /// and dropped.
    pub async fn put(&self, caller_id: &str, key: &str, value: &Value, ttl_secs: i64) {
        self.hot
            .insert(format!("{caller_id}:{key}"), value.clone())
            .await;
        if let Err(e) = self
            .docs
            .upsert(caller_id, "cache", key, value, Some(ttl_secs))
            .await
        {
            tracing::warn!(key, error = %e, "query cache write failed");
        }
    }

    /// Drop one entry.
    pub async fn invalidate(&self, caller_id: &str, key: &str) {
        self.hot.invalidate(&format!("{caller_id}:{key}")).await;
        if let Err(e) = self.docs.delete(caller_id, key).await {
            tracing::warn!(key, error = %e, "query cache delete failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Embedding cache
// ---------------------------------------------------------------------------

/// TTL cache for text embeddings, keyed by a digest of the text and kept
/// in the shared system partition (embeddings carry no caller data).
#[derive(Clone)]
pub struct EmbeddingCache {
    docs: DocumentStore,
}

impl EmbeddingCache {
    /// Create an embedding cache over `db`.
    pub fn new(db: Database) -> Self {
        Self {
            docs: DocumentStore::new(db),
        }
    }

    fn key(text: &str) -> String {
        format!("embedding:{}", digest_hex(&[text]))
    }

    /// Look up a cached embedding.  Never fails.
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        match self.docs.get(SYSTEM_PARTITION, &Self::key(text)).await {
            Ok(Some(value)) => serde_json::from_value(value["vector"].clone()).ok(),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, "embedding cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store an embedding with a TTL.  Never fails.
    pub async fn put(&self, text: &str, vector: &[f32], ttl_secs: i64) {
        let body = serde_json::json!({ "vector": vector });
        if let Err(e) = self
            .docs
            .upsert(
                SYSTEM_PARTITION,
                "embedding",
                &Self::key(text),
                &body,
                Some(ttl_secs),
            )
            .await
        {
            tracing::warn!(error = %e, "embedding cache write failed");
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────
