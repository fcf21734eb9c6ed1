//! Auth error types.
//!
//! All auth subsystems surface errors through [`AuthError`].  Context
//! extraction itself is infallible by contract; errors here come from
//! service-token handling.

/// Unified error type for the auth crate.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The service token is structurally invalid or its signature does not
    /// match.
    #[error("invalid service token: {reason}")]
    InvalidServiceToken { reason: String },

    /// The service token's `exp` claim is in the past.
    #[error("service token expired at {expired_at}")]
    ServiceTokenExpired { expired_at: i64 },

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the auth crate.
pub type Result<T> = std::result::Result<T, AuthError>;
