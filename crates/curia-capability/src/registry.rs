//! Capability registry.
//!
//! Maps capability names to their endpoint descriptors and roles to the
//! capabilities they may reach.  Loaded once from configuration at startup
//! and never mutated.
//!
//! Granting a role the *full* capability set is explicit configuration
//! (`full_access_roles`); the registry attaches no built-in meaning to the
//! string `"admin"`.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Endpoint configuration for one capability server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    /// Unique capability name (e.g. `"sales"`, `"graph"`).
    pub name: String,
    /// JSON-RPC endpoint URL.
    pub url: String,
    /// Where the transport credential comes from (e.g. an env var name).
    #[serde(default)]
    pub credential_source: Option<String>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Immutable role-to-capability routing table.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    capabilities: HashMap<String, CapabilityDescriptor>,
    role_capabilities: HashMap<String, BTreeSet<String>>,
    full_access_roles: BTreeSet<String>,
}

impl CapabilityRegistry {
    /// Build a registry from configuration.
    ///
    /// Role mappings referencing unconfigured capabilities are dropped with
    /// a warning rather than silently routing to nowhere.
    pub fn new(
        capabilities: Vec<CapabilityDescriptor>,
        role_capabilities: HashMap<String, Vec<String>>,
        full_access_roles: Vec<String>,
    ) -> Self {
        let capabilities: HashMap<String, CapabilityDescriptor> = capabilities
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();

        let role_capabilities = role_capabilities
            .into_iter()
            .map(|(role, names)| {
                let known: BTreeSet<String> = names
                    .into_iter()
                    .filter(|n| {
                        let known = capabilities.contains_key(n);
                        if !known {
                            tracing::warn!(
                                role = %role,
                                capability = %n,
                                "role maps to unconfigured capability, dropping"
                            );
                        }
                        known
                    })
                    .collect();
                (role, known)
            })
            .collect();

        Self {
            capabilities,
            role_capabilities,
            full_access_roles: full_access_roles.into_iter().collect(),
        }
    }

    /// The set of capability names the given roles may reach: the union of
    /// each role's permitted set.  A role listed in `full_access_roles`
    /// short-circuits to every configured capability.
    pub fn accessible(&self, roles: &[String]) -> BTreeSet<String> {
        if roles.iter().any(|r| self.full_access_roles.contains(r)) {
            return self.capabilities.keys().cloned().collect();
        }

        let mut out = BTreeSet::new();
        for role in roles {
            if let Some(names) = self.role_capabilities.get(role) {
                out.extend(names.iter().cloned());
            }
        }
        out
    }

    /// Look up one capability's descriptor.
    pub fn descriptor(&self, name: &str) -> Option<&CapabilityDescriptor> {
        self.capabilities.get(name)
    }

    /// All configured capability names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.capabilities.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of configured capabilities.
    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    /// Whether no capabilities are configured.
    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
