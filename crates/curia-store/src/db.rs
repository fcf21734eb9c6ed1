//! SQLite database handle.
//!
//! [`Database`] wraps a single `rusqlite::Connection` behind an
//! `Arc<Mutex<>>`; every operation runs on the blocking thread pool via
//! `tokio::task::spawn_blocking`.  The single connection also gives the
//! conversation store its linearizability: writes to one session are
//! serialized by construction.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::migration;

/// Thread-safe handle to a SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database at `path` and apply pragmas.
    ///
    /// Blocks briefly on file I/O; call during startup.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening conversation store");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory store");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database and run all pending migrations.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let db = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.execute(|conn| migration::run_all(conn)).await
    }

    /// Execute a closure against the connection on the blocking pool.
    ///
    /// This is the only way to touch the database from async code; the
    /// closure runs with the connection lock held, so multi-statement
    /// read-modify-write sequences are atomic with respect to each other.
    pub async fn execute<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("connection lock poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    // ── pragmas ──────────────────────────────────────────────────────

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // WAL: concurrent readers while a writer is active.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        // NORMAL sync is durable enough under WAL.
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Writers wait instead of failing when the database is busy.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        debug!("store pragmas applied");
        Ok(())
    }
}

// ── tests ────────────────────────────────────────────────────────────
