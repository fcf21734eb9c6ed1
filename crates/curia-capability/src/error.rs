//! Capability-plane error types.
//!
//! All capability subsystems surface errors through [`CapabilityError`].
//! The split between [`CapabilityError::Transport`] and
//! [`CapabilityError::Rpc`] matters: transport failures are retried once by
//! the client, application-level RPC errors never are.

/// Unified error type for the capability plane.
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    // -- Registry errors -----------------------------------------------------
    /// The named capability is not present in the registry.
    #[error("capability not configured: {name}")]
    NotConfigured { name: String },

    /// The named capability has no loaded client.
    #[error("capability client not loaded: {name}")]
    NotLoaded { name: String },

    // -- Protocol errors -----------------------------------------------------
    /// The remote returned a JSON-RPC application error.  Never retried.
    #[error("capability rpc error {code}: {message}")]
    Rpc { code: i32, message: String },

    /// A transport-level failure (connect, timeout, malformed body).
    /// Retried at most once by the client.
    #[error("capability transport error: {reason}")]
    Transport { reason: String },

    /// The per-call timeout elapsed.
    #[error("capability call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// The remote's response could not be decoded into the expected shape.
    #[error("capability response decode error: {reason}")]
    Decode { reason: String },

    // -- Service-side errors -------------------------------------------------
    /// The requested tool is not part of this capability's catalog.
    #[error("unknown tool: {tool}")]
    UnknownTool { tool: String },

    /// The caller's service credential was missing or invalid.
    #[error("service credential rejected: {reason}")]
    Unauthorized { reason: String },

    // -- Serialization -------------------------------------------------------
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the capability crate.
pub type Result<T> = std::result::Result<T, CapabilityError>;

impl CapabilityError {
    /// Whether the client may retry the call once.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. })
    }
}
