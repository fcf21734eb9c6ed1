//! Low-level document access.
//!
//! Every persisted object is one row in the `documents` table:
//! partitioned by `caller_id`, discriminated by `doc_type`
//! (`session | cache | embedding | feedback`).  The typed stores in this
//! crate are thin layers over these operations; nothing outside the crate
//! ever sees `doc_type`.

use chrono::Utc;
use serde_json::Value;

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// Partition value for documents not owned by any caller (embeddings).
pub const SYSTEM_PARTITION: &str = "system";

/// Typed wrapper over the `documents` table.
#[derive(Clone)]
pub struct DocumentStore {
    db: Database,
}

impl DocumentStore {
    /// Create a document store over `db`.
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert or replace a document.  `ttl_secs` sets `expires_at`.
    pub async fn upsert(
        &self,
        caller_id: &str,
        doc_type: &str,
        id: &str,
        body: &Value,
        ttl_secs: Option<i64>,
    ) -> StoreResult<()> {
        let caller_id = caller_id.to_owned();
        let doc_type = doc_type.to_owned();
        let id = id.to_owned();
        let body = serde_json::to_string(body)?;
        let now = Utc::now().timestamp();
        let expires_at = ttl_secs.map(|ttl| now + ttl);

        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO documents (id, caller_id, doc_type, body, expires_at, updated_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                     ON CONFLICT(caller_id, id) DO UPDATE SET \
                       doc_type = excluded.doc_type, \
                       body = excluded.body, \
                       expires_at = excluded.expires_at, \
                       updated_at = excluded.updated_at",
                    rusqlite::params![id, caller_id, doc_type, body, expires_at, now],
                )?;
                Ok(())
            })
            .await
    }

    /// Fetch a document body by id within a caller partition.  Expired
    /// documents are deleted on read and reported as absent.
    pub async fn get(&self, caller_id: &str, id: &str) -> StoreResult<Option<Value>> {
        let caller_id = caller_id.to_owned();
        let id = id.to_owned();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let row: Option<(String, Option<i64>)> = match conn.query_row(
                    "SELECT body, expires_at FROM documents WHERE caller_id = ?1 AND id = ?2",
                    rusqlite::params![caller_id, id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                ) {
                    Ok(row) => Some(row),
                    Err(rusqlite::Error::QueryReturnedNoRows) => None,
                    Err(e) => return Err(StoreError::Sqlite(e)),
                };

                let Some((body, expires_at)) = row else {
                    return Ok(None);
                };

                if expires_at.is_some_and(|exp| exp <= now) {
                    conn.execute(
                        "DELETE FROM documents WHERE caller_id = ?1 AND id = ?2",
                        rusqlite::params![caller_id, id],
                    )?;
                    return Ok(None);
                }

                Ok(Some(serde_json::from_str(&body)?))
            })
            .await
    }

    /// Delete a document.  Returns whether it existed.
    pub async fn delete(&self, caller_id: &str, id: &str) -> StoreResult<bool> {
        let caller_id = caller_id.to_owned();
        let id = id.to_owned();

        self.db
            .execute(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM documents WHERE caller_id = ?1 AND id = ?2",
                    rusqlite::params![caller_id, id],
                )?;
                Ok(deleted > 0)
            })
            .await
    }

    /// List bodies of all live documents of one type within a partition,
    /// newest first.
    pub async fn list(
        &self,
        caller_id: &str,
        doc_type: &str,
        limit: u32,
    ) -> StoreResult<Vec<Value>> {
        let caller_id = caller_id.to_owned();
        let doc_type = doc_type.to_owned();
        let now = Utc::now().timestamp();

        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT body FROM documents \
                     WHERE caller_id = ?1 AND doc_type = ?2 \
                       AND (expires_at IS NULL OR expires_at > ?3) \
                     ORDER BY updated_at DESC LIMIT ?4",
                )?;
                let bodies = stmt
                    .query_map(rusqlite::params![caller_id, doc_type, now, limit], |row| {
                        row.get::<_, String>(0)
                    })?
                    .collect::<Result<Vec<String>, _>>()?;

                bodies
                    .into_iter()
                    .map(|b| serde_json::from_str(&b).map_err(StoreError::from))
                    .collect()
            })
            .await
    }

    /// Remove every expired document.  Returns the number removed.
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM documents WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    rusqlite::params![now],
                )?;
                Ok(removed)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> DocumentStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        DocumentStore::new(db)
    }

    #[tokio::test]
    async fn upsert_and_get() {
        let docs = store().await;
        docs.upsert("alice", "cache", "k1", &json!({"v": 1}), None)
            .await
            .unwrap();

        let body = docs.get("alice", "k1").await.unwrap().unwrap();
        assert_eq!(body["v"], 1);
    }

    #[tokio::test]
    async fn partitions_are_isolated() {
        let docs = store().await;
        docs.upsert("alice", "cache", "k1", &json!({"v": 1}), None)
            .await
            .unwrap();

        assert!(docs.get("bob", "k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_body() {
        let docs = store().await;
        docs.upsert("alice", "cache", "k1", &json!({"v": 1}), None)
            .await
            .unwrap();
        docs.upsert("alice", "cache", "k1", &json!({"v": 2}), None)
            .await
            .unwrap();

        let body = docs.get("alice", "k1").await.unwrap().unwrap();
        assert_eq!(body["v"], 2);
    }

    #[tokio::test]
    async fn expired_documents_are_absent() {
        let docs = store().await;
        docs.upsert("alice", "cache", "k1", &json!({"v": 1}), Some(-5))
            .await
            .unwrap();

        assert!(docs.get("alice", "k1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_filters_by_type() {
        let docs = store().await;
        docs.upsert("alice", "cache", "k1", &json!({"v": 1}), None)
            .await
            .unwrap();
        docs.upsert("alice", "feedback", "f1", &json!({"rating": 5}), None)
            .await
            .unwrap();

        let cached = docs.list("alice", "cache", 10).await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0]["v"], 1);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let docs = store().await;
        docs.upsert("alice", "cache", "dead", &json!({}), Some(-5))
            .await
            .unwrap();
        docs.upsert("alice", "cache", "live", &json!({}), Some(3600))
            .await
            .unwrap();

        let removed = docs.purge_expired().await.unwrap();
        assert_eq!(removed, 1);
        assert!(docs.get("alice", "live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let docs = store().await;
        docs.upsert("alice", "cache", "k1", &json!({}), None)
            .await
            .unwrap();

        assert!(docs.delete("alice", "k1").await.unwrap());
        assert!(!docs.delete("alice", "k1").await.unwrap());
    }
}
