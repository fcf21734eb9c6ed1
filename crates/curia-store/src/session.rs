//! Session and turn persistence.
//!
//! A session document carries its full turn list (capped at
//! `max_turns_retained`; older turns are elided into a compact summary
//! kept on the document).  `append_turn` is atomic and linearizable per
//! session: the turn number is assigned inside a single read-modify-write
//! against the store, so concurrent appends to one session serialize and
//! always produce strictly increasing numbers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use curia_auth::RbacContext;

use crate::db::Database;
use crate::documents::DocumentStore;
use crate::error::{StoreError, StoreResult};

const DOC_TYPE: &str = "session";

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// One user message, the assistant's answer, and everything executed in
/// between.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn id.
    pub turn_id: String,
    /// 1-based sequence number within the session.
    pub turn_number: u64,
    /// The user's message.
    pub user_message: String,
    /// The assistant's final answer.
    pub assistant_message: String,
    /// Execution records (opaque JSON; the store never inspects them).
    #[serde(default)]
    pub records: Vec<Value>,
    /// When the turn started.
    pub started_at: DateTime<Utc>,
    /// When the turn completed.
    pub completed_at: DateTime<Utc>,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// A turn ready to append; the store assigns its number and id.
#[derive(Debug, Clone)]
pub struct NewTurn {
    /// The user's message.
    pub user_message: String,
    /// The assistant's final answer.
    pub assistant_message: String,
    /// Execution records.
    pub records: Vec<Value>,
    /// When the turn started.
    pub started_at: DateTime<Utc>,
    /// When the turn completed.
    pub completed_at: DateTime<Utc>,
}

/// A conversation session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session id.
    pub session_id: String,
    /// Owning caller (also the storage partition).
    pub caller_id: String,
    /// Tenant the session belongs to.
    pub tenant_id: String,
    /// Roles the caller held when the session was created.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Retained turns, oldest first.
    #[serde(default)]
    pub turns: Vec<Turn>,
    /// Compact summary of turns elided by the retention cap.
    #[serde(default)]
    pub elided_summary: Option<String>,
    /// Total turns ever appended (including elided ones).
    #[serde(default)]
    pub total_turns: u64,
    /// Total tool executions across all turns.
    #[serde(default)]
    pub total_tool_calls: u64,
    /// Total time spent answering, in milliseconds.
    #[serde(default)]
    pub total_duration_ms: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════
//  SessionStore
// ═══════════════════════════════════════════════════════════════════════

/// CRUD over session documents.
#[derive(Clone)]
pub struct SessionStore {
    docs: DocumentStore,
    max_turns_retained: usize,
}

impl SessionStore {
    /// Create a session store with the default retention cap (200 turns).
    pub fn new(db: Database) -> Self {
        Self::with_retention(db, 200)
    }

    /// Create a session store with an explicit retention cap.
    pub fn with_retention(db: Database, max_turns_retained: usize) -> Self {
        Self {
            docs: DocumentStore::new(db),
            max_turns_retained: max_turns_retained.max(1),
        }
    }

    /// Create a new session owned by the caller in `rbac`.
    pub async fn create_session(&self, rbac: &RbacContext) -> StoreResult<Session> {
        let now = Utc::now();
        let session = Session {
            session_id: Uuid::now_v7().to_string(),
            caller_id: rbac.caller_id.clone(),
            tenant_id: rbac.tenant_id.clone(),
            roles: rbac.roles.clone(),
            turns: Vec::new(),
            elided_summary: None,
            total_turns: 0,
            total_tool_calls: 0,
            total_duration_ms: 0,
            created_at: now,
            updated_at: now,
        };

        self.docs
            .upsert(
                &session.caller_id,
                DOC_TYPE,
                &session.session_id,
                &serde_json::to_value(&session)?,
                None,
            )
            .await?;

        tracing::debug!(session_id = %session.session_id, caller = %session.caller_id, "session created");
        Ok(session)
    }

    /// Fetch a session by id within the caller's partition.
    pub async fn get_session(&self, caller_id: &str, session_id: &str) -> StoreResult<Session> {
        let body = self
            .docs
            .get(caller_id, session_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                entity: "session",
                id: session_id.to_owned(),
            })?;
        Ok(serde_json::from_value(body)?)
    }

    /// Append a turn atomically, assigning `turn_number` = predecessor + 1.
    ///
    /// Appends to one session serialize on the store's single connection;
    /// a partially-appended turn is never observable.
    pub async fn append_turn(
        &self,
        caller_id: &str,
        session_id: &str,
        turn: NewTurn,
    ) -> StoreResult<Turn> {
        let caller_id = caller_id.to_owned();
        let session_id = session_id.to_owned();
        let max_retained = self.max_turns_retained;
        let now = Utc::now();

        self.docs
            .database()
            .execute(move |conn| {
                // Read-modify-write under the connection lock: this is the
                // linearization point for the session.
                let body: String = conn
                    .query_row(
                        "SELECT body FROM documents WHERE caller_id = ?1 AND id = ?2",
                        rusqlite::params![caller_id, session_id],
                        |row| row.get(0),
                    )
                    .map_err(|e| match e {
                        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound {
                            entity: "session",
                            id: session_id.clone(),
                        },
                        other => StoreError::Sqlite(other),
                    })?;
                let mut session: Session = serde_json::from_str(&body)?;

                let turn_number = session.turns.last().map_or(0, |t| t.turn_number) + 1;
                let duration_ms = (turn.completed_at - turn.started_at)
                    .num_milliseconds()
                    .max(0) as u64;

                let appended = Turn {
                    turn_id: Uuid::now_v7().to_string(),
                    turn_number,
                    user_message: turn.user_message,
                    assistant_message: turn.assistant_message,
                    records: turn.records,
                    started_at: turn.started_at,
                    completed_at: turn.completed_at,
                    duration_ms,
                };

                session.total_turns += 1;
                session.total_tool_calls += appended.records.len() as u64;
                session.total_duration_ms += duration_ms;
                session.updated_at = now;
                session.turns.push(appended.clone());

                // Retention cap: elide the oldest turns into the summary.
                if session.turns.len() > max_retained {
                    let excess = session.turns.len() - max_retained;
                    let elided: Vec<Turn> = session.turns.drain(..excess).collect();
                    let mut summary = session.elided_summary.take().unwrap_or_default();
                    for old in &elided {
                        summary.push_str(&format!(
                            "[turn {}] user: {} / assistant: {}\n",
                            old.turn_number,
                            truncate_for_summary(&old.user_message),
                            truncate_for_summary(&old.assistant_message),
                        ));
                    }
                    session.elided_summary = Some(summary);
                }

                let body = serde_json::to_string(&session)?;
                conn.execute(
                    "UPDATE documents SET body = ?3, updated_at = ?4 \
                     WHERE caller_id = ?1 AND id = ?2",
                    rusqlite::params![caller_id, session_id, body, now.timestamp()],
                )?;

                Ok(appended)
            })
            .await
    }

    /// The most recent `n` turns, oldest first.
    pub async fn recent_turns(
        &self,
        caller_id: &str,
        session_id: &str,
        n: usize,
    ) -> StoreResult<Vec<Turn>> {
        let session = self.get_session(caller_id, session_id).await?;
        let start = session.turns.len().saturating_sub(n);
        Ok(session.turns[start..].to_vec())
    }
}

/// First line of a message, capped for the elision summary.
fn truncate_for_summary(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    let mut cut = line.len().min(120);
    while cut > 0 && !line.is_char_boundary(cut) {
        cut -= 1;
    }
    line[..cut].to_owned()
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use curia_auth::AccessScope;

    fn rbac() -> RbacContext {
        RbacContext {
            caller_id: "alice@example.com".into(),
            tenant_id: "tenant-1".into(),
            object_id: "oid-1".into(),
            roles: vec!["sales_rep".into()],
            admin: false,
            access_scope: AccessScope::default(),
        }
    }

    fn turn(user: &str, assistant: &str) -> NewTurn {
        let now = Utc::now();
        NewTurn {
            user_message: user.into(),
            assistant_message: assistant.into(),
            records: vec![],
            started_at: now,
            completed_at: now,
        }
    }

    async fn store() -> SessionStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        SessionStore::new(db)
    }

    #[tokio::test]
    async fn create_and_fetch_session() {
        let store = store().await;
        let session = store.create_session(&rbac()).await.unwrap();

        let fetched = store
            .get_session("alice@example.com", &session.session_id)
            .await
            .unwrap();
        assert_eq!(fetched.caller_id, "alice@example.com");
        assert_eq!(fetched.tenant_id, "tenant-1");
        assert!(fetched.turns.is_empty());
    }

    #[tokio::test]
    async fn missing_session_is_not_found() {
        let store = store().await;
        let result = store.get_session("alice@example.com", "nope").await;
        assert!(matches!(
            result,
            Err(StoreError::NotFound { entity: "session", .. })
        ));
    }

    #[tokio::test]
    async fn turn_numbers_increase_strictly() {
        let store = store().await;
        let session = store.create_session(&rbac()).await.unwrap();

        for expected in 1..=3u64 {
            let appended = store
                .append_turn(
                    "alice@example.com",
                    &session.session_id,
                    turn("question", "answer"),
                )
                .await
                .unwrap();
            assert_eq!(appended.turn_number, expected);
        }

        let fetched = store
            .get_session("alice@example.com", &session.session_id)
            .await
            .unwrap();
        assert_eq!(fetched.total_turns, 3);
    }

    #[tokio::test]
    async fn concurrent_appends_get_distinct_numbers() {
        let store = Arc::new(store().await);
        let session = store.create_session(&rbac()).await.unwrap();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                let session_id = session.session_id.clone();
                tokio::spawn(async move {
                    store
                        .append_turn(
                            "alice@example.com",
                            &session_id,
                            turn(&format!("q{i}"), "a"),
                        )
                        .await
                        .unwrap()
                        .turn_number
                })
            })
            .collect();

        let mut numbers = Vec::new();
        for task in tasks {
            numbers.push(task.await.unwrap());
        }
        numbers.sort_unstable();
        assert_eq!(numbers, (1..=8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn recent_turns_returns_tail_in_order() {
        let store = store().await;
        let session = store.create_session(&rbac()).await.unwrap();

        for i in 0..5 {
            store
                .append_turn(
                    "alice@example.com",
                    &session.session_id,
                    turn(&format!("q{i}"), &format!("a{i}")),
                )
                .await
                .unwrap();
        }

        let recent = store
            .recent_turns("alice@example.com", &session.session_id, 2)
            .await
            .unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].user_message, "q3");
        assert_eq!(recent[1].user_message, "q4");
    }

    #[tokio::test]
    async fn retention_cap_elides_old_turns() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let store = SessionStore::with_retention(db, 3);
        let session = store.create_session(&rbac()).await.unwrap();

        for i in 0..5 {
            store
                .append_turn(
                    "alice@example.com",
                    &session.session_id,
                    turn(&format!("q{i}"), &format!("a{i}")),
                )
                .await
                .unwrap();
        }

        let fetched = store
            .get_session("alice@example.com", &session.session_id)
            .await
            .unwrap();
        assert_eq!(fetched.turns.len(), 3);
        assert_eq!(fetched.turns[0].user_message, "q2");
        assert_eq!(fetched.total_turns, 5);

        let summary = fetched.elided_summary.unwrap();
        assert!(summary.contains("q0"));
        assert!(summary.contains("q1"));
        // Numbers keep counting past the elision.
        assert_eq!(fetched.turns.last().unwrap().turn_number, 5);
    }

    #[tokio::test]
    async fn tool_call_counter_accumulates() {
        let store = store().await;
        let session = store.create_session(&rbac()).await.unwrap();

        let mut with_records = turn("q", "a");
        with_records.records = vec![serde_json::json!({"tool": "query_sql"})];
        store
            .append_turn("alice@example.com", &session.session_id, with_records)
            .await
            .unwrap();

        let fetched = store
            .get_session("alice@example.com", &session.session_id)
            .await
            .unwrap();
        assert_eq!(fetched.total_tool_calls, 1);
    }
}
