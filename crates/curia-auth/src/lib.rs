//! Authorization model for Curia.
//!
//! This crate owns the [`RbacContext`] that travels with every request:
//! who the caller is, which tenant they belong to, which roles they hold,
//! and the [`AccessScope`] that downstream capability servers use to derive
//! row-level filters.  It also provides:
//!
//! - [`ContextExtractor`] -- builds an `RbacContext` from the caller's
//!   bearer token (signature verification happens upstream at the edge;
//!   this layer only decodes claims and never fails a request).
//! - Service tokens -- short-lived HMAC-signed credentials identifying the
//!   orchestrator itself when it talks to capability servers.

pub mod error;
pub mod extract;
pub mod rbac;
pub mod token;

pub use error::{AuthError, Result};
pub use extract::{ContextExtractor, DeploymentMode};
pub use rbac::{AccessScope, RbacContext};
pub use token::{ServiceTokenClaims, mint_service_token, verify_service_token};
