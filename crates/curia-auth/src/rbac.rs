//! RBAC context and access scope.
//!
//! An [`RbacContext`] is built once at request entry and is immutable for
//! the lifetime of the request.  It is serialized verbatim into every
//! capability call so the server side can re-derive row-level filters
//! without trusting anything the LLM produced.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Access scope
// ---------------------------------------------------------------------------

/// The subset of entities a caller may see.
///
/// When `all_entities` is set, `entity_ids` is informational only.
/// `owned_only` may combine with a non-empty `entity_ids` (the caller sees
/// the listed entities, further restricted to records they own).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessScope {
    /// Access to every entity in the tenant.
    #[serde(default)]
    pub all_entities: bool,

    /// Explicitly accessible entity IDs (opaque strings).
    #[serde(default)]
    pub entity_ids: BTreeSet<String>,

    /// Restrict to records owned by the caller.
    #[serde(default)]
    pub owned_only: bool,
}

impl AccessScope {
    /// A scope that can see everything.
    #[must_use]
    pub fn unrestricted() -> Self {
        Self {
            all_entities: true,
            entity_ids: BTreeSet::new(),
            owned_only: false,
        }
    }

    /// A scope limited to the given entity IDs.
    pub fn for_entities<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            all_entities: false,
            entity_ids: ids.into_iter().map(Into::into).collect(),
            owned_only: false,
        }
    }

    /// Whether this scope allows access to `entity_id`.
    #[must_use]
    pub fn can_access(&self, entity_id: &str) -> bool {
        self.all_entities || self.entity_ids.contains(entity_id)
    }
}

// ---------------------------------------------------------------------------
// RBAC context
// ---------------------------------------------------------------------------

/// The caller's identity, roles, and data access scope.
///
/// Field names here are the wire format sent to capability servers inside
/// every `tools/call` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RbacContext {
    /// Caller identifier (email or UPN).
    pub caller_id: String,

    /// Tenant identifier.
    pub tenant_id: String,

    /// Directory object ID of the caller.
    #[serde(default)]
    pub object_id: String,

    /// Role names held by the caller.
    #[serde(default)]
    pub roles: Vec<String>,

    /// Administrative flag (set when the `admin` role is present).
    #[serde(default)]
    pub admin: bool,

    /// Data access scope used for row-level filtering.
    #[serde(default)]
    pub access_scope: AccessScope,
}

impl RbacContext {
    /// Whether the caller holds the given role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the caller may access `entity_id`.  Admins bypass the scope.
    #[must_use]
    pub fn can_access_entity(&self, entity_id: &str) -> bool {
        self.admin || self.access_scope.can_access(entity_id)
    }

    /// The caller's roles, sorted -- used for deterministic cache keys.
    #[must_use]
    pub fn sorted_roles(&self) -> Vec<String> {
        let mut roles = self.roles.clone();
        roles.sort();
        roles
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_scope(scope: AccessScope) -> RbacContext {
        RbacContext {
            caller_id: "alice@example.com".into(),
            tenant_id: "tenant-1".into(),
            object_id: "oid-1".into(),
            roles: vec!["sales_rep".into()],
            admin: false,
            access_scope: scope,
        }
    }

    #[test]
    fn scoped_access() {
        let scope = AccessScope::for_entities(["acc-1", "acc-2"]);
        assert!(scope.can_access("acc-1"));
        assert!(!scope.can_access("acc-3"));
    }

    #[test]
    fn unrestricted_access() {
        let scope = AccessScope::unrestricted();
        assert!(scope.can_access("anything"));
    }

    #[test]
    fn admin_bypasses_scope() {
        let mut ctx = ctx_with_scope(AccessScope::for_entities(["acc-1"]));
        assert!(!ctx.can_access_entity("acc-9"));
        ctx.admin = true;
        assert!(ctx.can_access_entity("acc-9"));
    }

    #[test]
    fn sorted_roles_are_deterministic() {
        let mut ctx = ctx_with_scope(AccessScope::default());
        ctx.roles = vec!["zeta".into(), "alpha".into(), "mid".into()];
        assert_eq!(ctx.sorted_roles(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn wire_format_round_trip() {
        let ctx = ctx_with_scope(AccessScope::for_entities(["acc-1"]));
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["caller_id"], "alice@example.com");
        assert_eq!(json["access_scope"]["all_entities"], false);

        let back: RbacContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn missing_optional_wire_fields_default() {
        let back: RbacContext = serde_json::from_str(
            r#"{"caller_id":"bob@example.com","tenant_id":"t"}"#,
        )
        .unwrap();
        assert!(back.roles.is_empty());
        assert!(!back.admin);
        assert!(!back.access_scope.all_entities);
    }
}
