//! Versioned schema migrations.
//!
//! Each migration runs inside a transaction and bumps `PRAGMA
//! user_version` on success, so partially-applied migrations cannot be
//! observed.

use rusqlite::Connection;
use tracing::info;

use crate::error::{StoreError, StoreResult};

/// Apply every migration newer than the database's current version.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }

        conn.execute_batch(&format!(
            "BEGIN;\n{sql}\nPRAGMA user_version = {version};\nCOMMIT;"
        ))
        .map_err(|e| StoreError::Migration {
            version: *version,
            message: e.to_string(),
        })?;

        info!(version, "store migration applied");
    }

    Ok(())
}

/// Ordered `(version, sql)` pairs.
const MIGRATIONS: &[(u32, &str)] = &[
    (
        1,
        // The document store: one row per document, partitioned by
        // caller_id, discriminated by doc_type.  Routing on doc_type
        // happens only inside this crate.
        "CREATE TABLE IF NOT EXISTS documents (
            id TEXT NOT NULL,
            caller_id TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            body TEXT NOT NULL,
            expires_at INTEGER,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (caller_id, id)
        );
        CREATE INDEX IF NOT EXISTS idx_documents_type
            ON documents(caller_id, doc_type);
        CREATE INDEX IF NOT EXISTS idx_documents_expiry
            ON documents(expires_at) WHERE expires_at IS NOT NULL;",
    ),
    (
        2,
        // Read-only view of the ingestion pipeline's output.  The
        // pipeline upserts rows; the core only reads them.
        "CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            source TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            embedding TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_document
            ON chunks(document_id);",
    ),
];

// ── tests ────────────────────────────────────────────────────────────
