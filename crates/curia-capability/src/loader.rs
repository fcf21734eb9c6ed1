//! Capability loader.
//!
//! Lifecycle-owns the pool of [`CapabilityClient`]s and the per-capability
//! tool catalog cache.  The orchestrator borrows clients for the duration
//! of one request; clients never reference the loader back.
//!
//! Namespacing rule: tools are exposed upward as `"<capability>__<tool>"`
//! with a reverse map for dispatch.  Two capabilities advertising the same
//! unprefixed name both survive under distinct prefixed names.
//!
//! Discovery is single-flight per capability: concurrent discoveries for
//! the same capability coalesce onto one fetch.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::client::{CapabilityClient, TransportFactory};
use crate::protocol::ToolDescriptor;
use crate::registry::CapabilityRegistry;

/// Separator between capability and tool in a prefixed tool name.
pub const PREFIX_SEPARATOR: &str = "__";

/// Build the prefixed form of a tool name.
#[must_use]
pub fn prefixed_name(capability: &str, tool: &str) -> String {
    format!("{capability}{PREFIX_SEPARATOR}{tool}")
}

// ---------------------------------------------------------------------------
// Namespaced catalog
// ---------------------------------------------------------------------------

/// A tool re-keyed with its capability prefix, ready for the LLM catalog.
#[derive(Debug, Clone)]
pub struct NamespacedTool {
    /// The prefixed name presented to the LLM.
    pub name: String,
    /// Owning capability.
    pub capability: String,
    /// The unprefixed name used on the wire to the capability server.
    pub tool: String,
    /// Tool description.
    pub description: String,
    /// JSON-schema parameter object.
    pub parameters: Value,
}

/// The union of all discovered tools for one request, with the reverse map
/// `prefixed -> capability` used for dispatch.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: Vec<NamespacedTool>,
    reverse: HashMap<String, String>,
}

impl ToolCatalog {
    /// Build a catalog from per-capability tool lists.  Capabilities are
    /// processed in sorted order so the catalog is deterministic.
    pub fn from_discovered(discovered: &HashMap<String, Arc<Vec<ToolDescriptor>>>) -> Self {
        let mut capabilities: Vec<&String> = discovered.keys().collect();
        capabilities.sort();

        let mut catalog = Self::default();
        for capability in capabilities {
            for tool in discovered[capability].iter() {
                let prefixed = prefixed_name(capability, &tool.name);
                if catalog.reverse.contains_key(&prefixed) {
                    tracing::warn!(
                        tool = %prefixed,
                        "capability advertised a duplicate tool name, keeping first"
                    );
                    continue;
                }
                catalog
                    .reverse
                    .insert(prefixed.clone(), capability.clone());
                catalog.tools.push(NamespacedTool {
                    name: prefixed,
                    capability: capability.clone(),
                    tool: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                });
            }
        }
        catalog
    }

    /// Resolve a prefixed name to `(capability, unprefixed tool)`.
    pub fn resolve<'a>(&self, prefixed: &'a str) -> Option<(&str, &'a str)> {
        let capability = self.reverse.get(prefixed)?;
        let tool = prefixed.strip_prefix(&prefixed_name(capability, ""))?;
        Some((capability.as_str(), tool))
    }

    /// All tools, in deterministic order.
    pub fn tools(&self) -> &[NamespacedTool] {
        &self.tools
    }

    /// Number of tools in the catalog.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the catalog has no tools.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Pool of capability clients plus the cached tool catalogs.
pub struct CapabilityLoader {
    registry: Arc<CapabilityRegistry>,
    factory: Arc<dyn TransportFactory>,
    clients: DashMap<String, Arc<CapabilityClient>>,
    tools: DashMap<String, Arc<Vec<ToolDescriptor>>>,
    discovery_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl CapabilityLoader {
    /// Create a loader over the given registry and transport factory.
    pub fn new(registry: Arc<CapabilityRegistry>, factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            registry,
            factory,
            clients: DashMap::new(),
            tools: DashMap::new(),
            discovery_locks: DashMap::new(),
        }
    }

    /// Ensure a client exists for each named capability.  Idempotent;
    /// unknown or unconstructible capabilities are skipped with a warning.
    /// Returns the names that now have a live client.
    pub fn load(&self, names: &[String]) -> Vec<String> {
        let mut loaded = Vec::with_capacity(names.len());
        for name in names {
            if self.ensure_client(name).is_some() {
                loaded.push(name.clone());
            }
        }
        loaded
    }

    /// Get or create the client for one capability.
    fn ensure_client(&self, name: &str) -> Option<Arc<CapabilityClient>> {
        if let Some(client) = self.clients.get(name) {
            return Some(Arc::clone(&client));
        }

        let Some(descriptor) = self.registry.descriptor(name) else {
            tracing::warn!(capability = %name, "capability not configured, skipping");
            return None;
        };

        match self.factory.create(descriptor) {
            Ok(transport) => {
                let client = Arc::new(CapabilityClient::new(name, transport));
                // Another task may have raced us; keep whichever landed.
                let entry = self
                    .clients
                    .entry(name.to_owned())
                    .or_insert_with(|| Arc::clone(&client));
                tracing::info!(capability = %name, url = %descriptor.url, "capability client loaded");
                Some(Arc::clone(&entry))
            }
            Err(e) => {
                tracing::warn!(capability = %name, error = %e, "failed to create capability transport");
                None
            }
        }
    }

    /// The pooled client for one capability, if loaded.
    pub fn client(&self, name: &str) -> Option<Arc<CapabilityClient>> {
        self.clients.get(name).map(|c| Arc::clone(&c))
    }

    /// Fetch-and-cache the tool list for each named capability.
    ///
    /// Capabilities whose discovery fails are dropped from the result (the
    /// request proceeds without their tools).  Discovery across
    /// capabilities runs in parallel; per capability it is single-flight.
    pub async fn discover(
        &self,
        names: &[String],
    ) -> HashMap<String, Arc<Vec<ToolDescriptor>>> {
        let fetches = names.iter().map(|name| async move {
            self.discover_one(name)
                .await
                .map(|tools| (name.clone(), tools))
        });

        futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Single-flight discovery for one capability.
    async fn discover_one(&self, name: &str) -> Option<Arc<Vec<ToolDescriptor>>> {
        if let Some(cached) = self.tools.get(name) {
            return Some(Arc::clone(&cached));
        }

        let lock = Arc::clone(
            &self
                .discovery_locks
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        );
        let _flight = lock.lock().await;

        // A concurrent discovery may have filled the cache while we waited.
        if let Some(cached) = self.tools.get(name) {
            return Some(Arc::clone(&cached));
        }

        let client = self.ensure_client(name)?;
        match client.list_tools().await {
            Ok(tools) => {
                let valid: Vec<ToolDescriptor> = tools
                    .into_iter()
                    .filter(|t| {
                        let ok = t.has_valid_schema();
                        if !ok {
                            tracing::warn!(
                                capability = %name,
                                tool = %t.name,
                                "tool has non-object parameter schema, dropping"
                            );
                        }
                        ok
                    })
                    .collect();

                tracing::info!(
                    capability = %name,
                    tool_count = valid.len(),
                    "discovered capability tools"
                );

                let tools = Arc::new(valid);
                self.tools.insert(name.to_owned(), Arc::clone(&tools));
                Some(tools)
            }
            Err(e) => {
                tracing::warn!(
                    capability = %name,
                    error = %e,
                    "tool discovery failed, dropping capability for this request"
                );
                None
            }
        }
    }

    /// Drop the cached catalog for one capability (e.g. after a schema
    /// mismatch signal from `tools/call`).
    pub fn invalidate(&self, name: &str) {
        if self.tools.remove(name).is_some() {
            tracing::info!(capability = %name, "tool catalog invalidated");
        }
    }

    /// Drop all cached catalogs.  The next discovery refetches.
    pub fn refresh(&self) {
        self.tools.clear();
        tracing::info!("tool catalog cache cleared");
    }

    /// Release every client and cached catalog.  Called at shutdown.
    pub fn close_all(&self) {
        let count = self.clients.len();
        self.clients.clear();
        self.tools.clear();
        self.discovery_locks.clear();
        tracing::info!(client_count = count, "all capability clients closed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
