//! Shared application state.
//!
//! [`AppState`] is wrapped in an `Arc` and handed to every request
//! handler.  All process-wide state lives here behind narrow interfaces:
//! the capability client pool (inside the loader) and the stores.  Request
//! state never leaks into it.

use std::sync::Arc;
use std::time::Duration;

use curia_agent::{ChatBackend, Orchestrator};
use curia_auth::ContextExtractor;
use curia_capability::{CapabilityLoader, CapabilityRegistry, TransportFactory};
use curia_store::{CacheScope, Database, FeedbackStore, QueryCache, SessionStore};

use crate::config::Config;

/// Canned answer when a caller's roles grant no capabilities.
pub const POLICY_REFUSAL: &str = "You do not currently have access to any data \
     capabilities. Please contact your administrator to request access.";

/// Apology returned when the whole-request deadline expires.
pub const DEADLINE_APOLOGY: &str = "I could not finish processing your request in \
     time. Please try again, or ask a narrower question.";

/// Request-pipeline knobs copied out of the config at startup.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Whole-request deadline.
    pub request_deadline: Duration,
    /// Prior turns spliced into the LLM context.
    pub history_turns: usize,
    /// Cache key scope policy.
    pub cache_scope: CacheScope,
    /// Answer-cache TTL in seconds; zero disables the fast path.
    pub cache_ttl_s: i64,
}

/// Shared state accessible from every handler.
pub struct AppState {
    /// Builds the per-request RBAC context.
    pub extractor: ContextExtractor,
    /// Role -> capability routing.
    pub registry: Arc<CapabilityRegistry>,
    /// Capability client pool (process lifetime).
    pub loader: Arc<CapabilityLoader>,
    /// The tool-calling loop.
    pub orchestrator: Orchestrator,
    /// Session/turn persistence.
    pub sessions: SessionStore,
    /// Cached answers fast path.
    pub cache: QueryCache,
    /// Per-turn feedback records.
    pub feedback: FeedbackStore,
    /// Pipeline knobs.
    pub settings: RuntimeSettings,
}

impl AppState {
    /// Wire the state from configuration plus the injectable seams (chat
    /// backend and capability transport factory -- production uses the
    /// HTTP implementations, tests inject scripted ones).
    pub fn build(
        config: &Config,
        chat: Arc<dyn ChatBackend>,
        factory: Arc<dyn TransportFactory>,
        db: Database,
    ) -> Arc<Self> {
        let registry = Arc::new(config.registry());
        let loader = Arc::new(CapabilityLoader::new(Arc::clone(&registry), factory));
        let orchestrator =
            Orchestrator::new(Arc::clone(&loader), chat, config.orchestrator_config());

        Arc::new(Self {
            extractor: ContextExtractor::new(config.mode),
            registry,
            loader,
            orchestrator,
            sessions: SessionStore::with_retention(db.clone(), config.max_turns_retained),
            cache: QueryCache::new(db.clone()),
            feedback: FeedbackStore::new(db),
            settings: RuntimeSettings {
                request_deadline: Duration::from_secs_f64(config.request_deadline_s),
                history_turns: config.history_turns_in_context,
                cache_scope: config.cache_scope,
                cache_ttl_s: config.cache_ttl_s,
            },
        })
    }
}
