//! Caller feedback on assistant answers.
//!
//! Feedback documents live in the caller's partition alongside their
//! sessions, keyed by feedback id and linked to a session + turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::Database;
use crate::documents::DocumentStore;
use crate::error::StoreResult;

const DOC_TYPE: &str = "feedback";

/// One feedback submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Unique feedback id.
    pub feedback_id: String,
    /// The session the feedback refers to.
    pub session_id: String,
    /// The turn number within that session.
    pub turn_number: u64,
    /// Rating, positive or negative (-1 or 1; finer scales allowed).
    pub rating: i32,
    /// Optional free-text comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

/// Store for feedback documents.
#[derive(Clone)]
pub struct FeedbackStore {
    docs: DocumentStore,
}

impl FeedbackStore {
    /// Create a feedback store over `db`.
    pub fn new(db: Database) -> Self {
        Self {
            docs: DocumentStore::new(db),
        }
    }

    /// Record feedback for a turn.  Returns the stored record.
    pub async fn submit(
        &self,
        caller_id: &str,
        session_id: &str,
        turn_number: u64,
        rating: i32,
        comment: Option<String>,
    ) -> StoreResult<FeedbackRecord> {
        let record = FeedbackRecord {
            feedback_id: Uuid::now_v7().to_string(),
            session_id: session_id.to_owned(),
            turn_number,
            rating,
            comment,
            created_at: Utc::now(),
        };

        self.docs
            .upsert(
                caller_id,
                DOC_TYPE,
                &record.feedback_id,
                &serde_json::to_value(&record)?,
                None,
            )
            .await?;

        tracing::debug!(
            session_id = %session_id,
            turn_number,
            rating,
            "feedback recorded"
        );
        Ok(record)
    }

    /// All feedback a caller has submitted for one session.
    pub async fn for_session(
        &self,
        caller_id: &str,
        session_id: &str,
    ) -> StoreResult<Vec<FeedbackRecord>> {
        let bodies = self.docs.list(caller_id, DOC_TYPE, 1000).await?;
        let mut records: Vec<FeedbackRecord> = bodies
            .into_iter()
            .filter_map(|b| serde_json::from_value::<FeedbackRecord>(b).ok())
            .filter(|r| r.session_id == session_id)
            .collect();
        records.sort_by_key(|r| r.turn_number);
        Ok(records)
    }
}

// ── tests ────────────────────────────────────────────────────────────
