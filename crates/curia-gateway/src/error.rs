//! Gateway error types.

/// Unified error type for the gateway crate.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration could not be read or parsed.
    #[error("config error: {reason}")]
    Config { reason: String },

    /// A required environment variable (API key, token secret) is absent.
    #[error("missing environment variable: {name}")]
    MissingEnv { name: String },

    /// Error from the conversation store.
    #[error("store error: {0}")]
    Store(#[from] curia_store::StoreError),

    /// Error from the agent runtime.
    #[error("agent error: {0}")]
    Agent(#[from] curia_agent::AgentError),

    /// Error from the capability plane.
    #[error("capability error: {0}")]
    Capability(#[from] curia_capability::CapabilityError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the gateway crate.
pub type Result<T> = std::result::Result<T, GatewayError>;
