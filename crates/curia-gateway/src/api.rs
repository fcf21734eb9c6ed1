//! Request handlers for the public endpoint.
//!
//! The response is always a JSON document; transport-level 5xx is
//! reserved for unhandled defects.  Persistence failures never fail a
//! response: the answer is returned and the turn is dropped with a
//! warning (availability over durability of history).

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use curia_agent::{ExecutionMetadata, HistoryTurn, Phase};
use curia_auth::RbacContext;
use curia_store::{NewTurn, StoreError, Turn, cache_key};

use crate::state::{AppState, DEADLINE_APOLOGY, POLICY_REFUSAL};

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ---------------------------------------------------------------------------
// POST /v1/ask
// ---------------------------------------------------------------------------

/// Request body for the ask endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskRequest {
    /// The user's question.
    pub message: String,
    /// Existing session to continue; a new one is created when absent.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Caller bearer token (signature pre-verified upstream).
    #[serde(default)]
    pub token: Option<String>,
}

/// Response body for the ask endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    /// The session this exchange belongs to.
    pub session_id: String,
    /// The persisted turn, when one was written.
    pub turn_id: Option<String>,
    /// The answer (or apology) text.
    pub assistant_message: String,
    /// Loop counters.
    pub execution_metadata: ExecutionMetadata,
    /// False for timeout/failure apologies.
    pub final_answer: bool,
}

/// Answer a natural-language question through the orchestration loop.
pub async fn ask(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AskRequest>,
) -> impl IntoResponse {
    if request.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "message must not be empty"})),
        )
            .into_response();
    }

    let started_at = Utc::now();
    let rbac = state.extractor.extract(request.token.as_deref());
    let accessible: Vec<String> = state
        .registry
        .accessible(&rbac.roles)
        .into_iter()
        .collect();

    tracing::info!(
        caller = %rbac.caller_id,
        tenant = %rbac.tenant_id,
        roles = ?rbac.roles,
        capabilities = ?accessible,
        "ask request"
    );

    // Resolve or create the session.  Store failures downgrade to a
    // detached session: the request proceeds, nothing is persisted.
    let (session_id, history, persist) =
        resolve_session(&state, &rbac, request.session_id.as_deref()).await;

    // Empty capability set: canned refusal, no LLM call, persisted as a
    // turn with no execution records.
    if accessible.is_empty() {
        tracing::warn!(caller = %rbac.caller_id, "no accessible capabilities for caller roles");
        let turn_id = if persist {
            persist_turn(
                &state,
                &rbac,
                &session_id,
                &request.message,
                POLICY_REFUSAL,
                Vec::new(),
                started_at,
            )
            .await
        } else {
            None
        };
        return Json(AskResponse {
            session_id,
            turn_id,
            assistant_message: POLICY_REFUSAL.to_owned(),
            execution_metadata: ExecutionMetadata::default(),
            final_answer: true,
        })
        .into_response();
    }

    // Cached-answer fast path for stateless one-shots.
    let cache_lookup_key = (request.session_id.is_none() && state.settings.cache_ttl_s > 0)
        .then(|| {
            cache_key(
                &request.message,
                &rbac.caller_id,
                &rbac.tenant_id,
                &rbac.roles,
                "ask",
                state.settings.cache_scope,
            )
        });
    if let Some(key) = &cache_lookup_key
        && let Some(cached) = state.cache.get(&rbac.caller_id, key).await
        && let Ok(response) = serde_json::from_value::<AskResponse>(cached)
    {
        tracing::info!(caller = %rbac.caller_id, "serving cached answer");
        let turn_id = if persist {
            persist_turn(
                &state,
                &rbac,
                &session_id,
                &request.message,
                &response.assistant_message,
                Vec::new(),
                started_at,
            )
            .await
        } else {
            None
        };
        return Json(AskResponse {
            session_id,
            turn_id,
            ..response
        })
        .into_response();
    }

    // Run the loop under the whole-request deadline.  On expiry the
    // round is abandoned and nothing from this request is persisted.
    let outcome = match tokio::time::timeout(
        state.settings.request_deadline,
        state
            .orchestrator
            .run(&request.message, &rbac, &accessible, &history),
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(_) => {
            tracing::warn!(
                caller = %rbac.caller_id,
                deadline = ?state.settings.request_deadline,
                "request deadline exceeded"
            );
            return Json(AskResponse {
                session_id,
                turn_id: None,
                assistant_message: DEADLINE_APOLOGY.to_owned(),
                execution_metadata: ExecutionMetadata::default(),
                final_answer: false,
            })
            .into_response();
        }
    };

    // Persist only completed turns; timeouts and failures return their
    // apology without touching history.
    let turn_id = if persist && outcome.phase == Phase::Done {
        let records: Vec<Value> = outcome
            .records
            .iter()
            .filter_map(|r| serde_json::to_value(r).ok())
            .collect();
        persist_turn(
            &state,
            &rbac,
            &session_id,
            &request.message,
            &outcome.assistant_message,
            records,
            started_at,
        )
        .await
    } else {
        None
    };

    let response = AskResponse {
        session_id,
        turn_id,
        assistant_message: outcome.assistant_message,
        execution_metadata: outcome.metadata,
        final_answer: outcome.final_answer,
    };

    if let Some(key) = &cache_lookup_key
        && outcome.phase == Phase::Done
        && let Ok(value) = serde_json::to_value(&response)
    {
        state
            .cache
            .put(&rbac.caller_id, key, &value, state.settings.cache_ttl_s)
            .await;
    }

    Json(response).into_response()
}

/// Resolve an existing session or create one, returning
/// `(session_id, history, persistable)`.
async fn resolve_session(
    state: &AppState,
    rbac: &RbacContext,
    session_id: Option<&str>,
) -> (String, Vec<HistoryTurn>, bool) {
    if let Some(id) = session_id {
        match state.sessions.get_session(&rbac.caller_id, id).await {
            Ok(session) => {
                let history = to_history(&session.turns, state.settings.history_turns);
                return (session.session_id, history, true);
            }
            Err(StoreError::NotFound { .. }) => {
                tracing::warn!(session_id = %id, "unknown session id, creating a new session");
            }
            Err(e) => {
                tracing::warn!(error = %e, "session lookup failed, proceeding detached");
                return (Uuid::now_v7().to_string(), Vec::new(), false);
            }
        }
    }

    match state.sessions.create_session(rbac).await {
        Ok(session) => (session.session_id, Vec::new(), true),
        Err(e) => {
            tracing::warn!(error = %e, "session creation failed, proceeding detached");
            (Uuid::now_v7().to_string(), Vec::new(), false)
        }
    }
}

/// The most recent turns as LLM history entries.
fn to_history(turns: &[Turn], n: usize) -> Vec<HistoryTurn> {
    let start = turns.len().saturating_sub(n);
    turns[start..]
        .iter()
        .map(|t| HistoryTurn {
            user: t.user_message.clone(),
            assistant: t.assistant_message.clone(),
        })
        .collect()
}

/// Append a turn, surviving persistence failures with a warning.
async fn persist_turn(
    state: &AppState,
    rbac: &RbacContext,
    session_id: &str,
    user_message: &str,
    assistant_message: &str,
    records: Vec<Value>,
    started_at: chrono::DateTime<Utc>,
) -> Option<String> {
    let turn = NewTurn {
        user_message: user_message.to_owned(),
        assistant_message: assistant_message.to_owned(),
        records,
        started_at,
        completed_at: Utc::now(),
    };

    match state
        .sessions
        .append_turn(&rbac.caller_id, session_id, turn)
        .await
    {
        Ok(appended) => Some(appended.turn_id),
        Err(e) => {
            tracing::warn!(
                session_id = %session_id,
                error = %e,
                "turn persistence failed, answer returned anyway"
            );
            None
        }
    }
}

// ---------------------------------------------------------------------------
// POST /v1/feedback
// ---------------------------------------------------------------------------

/// Request body for the feedback endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRequest {
    /// The session the feedback refers to.
    pub session_id: String,
    /// The turn number within that session.
    pub turn_number: u64,
    /// Rating (-1 or 1; finer scales allowed).
    pub rating: i32,
    /// Optional free-text comment.
    #[serde(default)]
    pub comment: Option<String>,
    /// Caller bearer token.
    #[serde(default)]
    pub token: Option<String>,
}

/// Record feedback for a turn.
pub async fn feedback(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FeedbackRequest>,
) -> impl IntoResponse {
    let rbac = state.extractor.extract(request.token.as_deref());

    match state
        .feedback
        .submit(
            &rbac.caller_id,
            &request.session_id,
            request.turn_number,
            request.rating,
            request.comment,
        )
        .await
    {
        Ok(record) => (
            StatusCode::OK,
            Json(json!({"feedback_id": record.feedback_id})),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "feedback submission failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "feedback could not be recorded"})),
            )
        }
    }
}
