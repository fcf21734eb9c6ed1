//! Auth context extraction.
//!
//! Builds an [`RbacContext`] from the caller's bearer token.  Signature
//! verification is performed upstream at the edge; this layer only decodes
//! the claim set.  Extraction never fails a request: a missing or garbled
//! token degrades to an anonymous readonly context with a warning.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::rbac::{AccessScope, RbacContext};

// ---------------------------------------------------------------------------
// Deployment mode
// ---------------------------------------------------------------------------

/// Selects auth behavior.  Must be configured explicitly; there is no
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    /// Fixed admin dev context; never inspects the token.
    Development,
    /// Decode the (pre-verified) token's claim set.
    Production,
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

/// Builds the per-request [`RbacContext`].
#[derive(Debug, Clone)]
pub struct ContextExtractor {
    mode: DeploymentMode,
}

impl ContextExtractor {
    /// Create an extractor for the given deployment mode.
    #[must_use]
    pub fn new(mode: DeploymentMode) -> Self {
        Self { mode }
    }

    /// The configured mode.
    #[must_use]
    pub fn mode(&self) -> DeploymentMode {
        self.mode
    }

    /// Extract an [`RbacContext`] from an optional bearer token.
    ///
    /// Infallible by contract: unparsable input yields the anonymous
    /// readonly context.
    pub fn extract(&self, token: Option<&str>) -> RbacContext {
        match self.mode {
            DeploymentMode::Development => {
                tracing::debug!("development mode: using fixed dev context");
                dev_context()
            }
            DeploymentMode::Production => {
                let Some(token) = token.filter(|t| !t.is_empty()) else {
                    tracing::warn!("no token provided, using anonymous context");
                    return anonymous_context();
                };

                match decode_unverified_claims(token) {
                    Some(claims) => context_from_claims(&claims),
                    None => {
                        tracing::warn!("token claim decode failed, using anonymous context");
                        anonymous_context()
                    }
                }
            }
        }
    }
}

/// The fixed development context: full access, admin role.
fn dev_context() -> RbacContext {
    RbacContext {
        caller_id: "dev".into(),
        tenant_id: "dev".into(),
        object_id: "dev".into(),
        roles: vec!["admin".into()],
        admin: true,
        access_scope: AccessScope::unrestricted(),
    }
}

/// The anonymous readonly context used when no usable token is present.
fn anonymous_context() -> RbacContext {
    RbacContext {
        caller_id: "anonymous".into(),
        tenant_id: "unknown".into(),
        object_id: "unknown".into(),
        roles: vec!["readonly".into()],
        admin: false,
        access_scope: AccessScope::default(),
    }
}

// ---------------------------------------------------------------------------
// Claim decoding
// ---------------------------------------------------------------------------

/// Decode the payload segment of a compact JWT without verifying the
/// signature.  Returns `None` on any structural problem.
fn decode_unverified_claims(token: &str) -> Option<Value> {
    let mut segments = token.split('.');
    let _header = segments.next()?;
    let payload = segments.next()?;

    // Tolerate padded producers.
    let payload = payload.trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    claims.is_object().then_some(claims)
}

/// Map a decoded claim set to an [`RbacContext`].
///
/// `email`/`upn` -> caller_id, `tid` -> tenant_id, `oid` -> object_id,
/// `roles` (string or array) -> role list.  The `admin` role sets the
/// administrative flag and widens the scope to all entities.
fn context_from_claims(claims: &Value) -> RbacContext {
    let caller_id = claims["email"]
        .as_str()
        .or_else(|| claims["upn"].as_str())
        .unwrap_or("unknown")
        .to_owned();
    let tenant_id = claims["tid"].as_str().unwrap_or("unknown").to_owned();
    let object_id = claims["oid"].as_str().unwrap_or("unknown").to_owned();

    let roles: Vec<String> = match &claims["roles"] {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_owned)
            .collect(),
        _ => Vec::new(),
    };

    let admin = roles.iter().any(|r| r == "admin");
    let access_scope = if admin {
        AccessScope::unrestricted()
    } else {
        AccessScope::default()
    };

    tracing::debug!(
        caller_id = %caller_id,
        tenant_id = %tenant_id,
        roles = ?roles,
        admin,
        "extracted rbac context from token claims"
    );

    RbacContext {
        caller_id,
        tenant_id,
        object_id,
        roles,
        admin,
        access_scope,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
