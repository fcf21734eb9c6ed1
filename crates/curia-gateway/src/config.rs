//! Gateway configuration.
//!
//! Loaded once from TOML at startup.  `mode` is the only option without a
//! default: running without an explicit deployment mode is a startup
//! error, never a guess.  Secrets are not stored in the file; the config
//! names the environment variables they come from.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use curia_auth::DeploymentMode;
use curia_capability::{CapabilityDescriptor, CapabilityRegistry, StatementBlocklist};
use curia_agent::OrchestratorConfig;
use curia_store::CacheScope;

use crate::error::{GatewayError, Result};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Endpoint entry for one capability server.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityEndpoint {
    /// JSON-RPC endpoint URL.
    pub url: String,
    /// Env var holding the transport credential, when the capability
    /// needs one beyond the shared service token.
    #[serde(default)]
    pub credential_source: Option<String>,
}

/// LLM backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    /// API base URL.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    /// Model identifier.
    pub model: String,
    /// Env var holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Sampling temperature.
    #[serde(default)]
    pub temperature: Option<f32>,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}

fn default_api_key_env() -> String {
    "CURIA_LLM_API_KEY".into()
}

/// The full gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Deployment mode; selects auth behavior.  Required.
    pub mode: DeploymentMode,

    /// HTTP bind address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// SQLite path for the conversation store.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// LLM backend.
    pub llm: LlmSettings,

    /// Capability servers by name.
    #[serde(default)]
    pub capabilities: HashMap<String, CapabilityEndpoint>,

    /// Role -> permitted capability names.
    #[serde(default)]
    pub roles_to_capabilities: HashMap<String, Vec<String>>,

    /// Roles granted the full capability set.  Explicit opt-in; no role
    /// name has built-in meaning here.
    #[serde(default)]
    pub full_access_roles: Vec<String>,

    /// Round budget for the orchestration loop.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Fan-out cap for parallel tool dispatch.
    #[serde(default = "default_max_parallel")]
    pub max_parallel_tool_calls: usize,

    /// LLM call timeout, seconds.
    #[serde(default = "default_llm_timeout")]
    pub llm_timeout_s: f64,

    /// Capability tool call timeout, seconds.
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_s: f64,

    /// Whole-request deadline, seconds.
    #[serde(default = "default_request_deadline")]
    pub request_deadline_s: f64,

    /// Character ceiling for the per-turn argument budget.
    #[serde(default = "default_token_budget")]
    pub token_budget_chars: usize,

    /// Dangerous-statement patterns (case-insensitive substrings).
    #[serde(default = "StatementBlocklist::default_patterns")]
    pub dangerous_patterns: Vec<String>,

    /// Prior turns spliced into the LLM context.
    #[serde(default = "default_history_turns")]
    pub history_turns_in_context: usize,

    /// Turns retained per session before elision.
    #[serde(default = "default_max_turns_retained")]
    pub max_turns_retained: usize,

    /// Whether roles participate in cache keys.
    #[serde(default)]
    pub cache_scope: CacheScope,

    /// TTL for cached answers, seconds.  Zero disables the fast path.
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_s: i64,

    /// Env var holding the service-token signing secret (production).
    #[serde(default = "default_token_secret_env")]
    pub service_token_secret_env: String,

    /// Service token lifetime, seconds.
    #[serde(default = "default_service_token_ttl")]
    pub service_token_ttl_s: i64,

    /// System prompt override.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".into()
}
fn default_database_path() -> String {
    "data/curia.db".into()
}
fn default_max_rounds() -> u32 {
    8
}
fn default_max_parallel() -> usize {
    4
}
fn default_llm_timeout() -> f64 {
    60.0
}
fn default_tool_timeout() -> f64 {
    30.0
}
fn default_request_deadline() -> f64 {
    180.0
}
fn default_token_budget() -> usize {
    16_000
}
fn default_history_turns() -> usize {
    5
}
fn default_max_turns_retained() -> usize {
    200
}
fn default_cache_ttl() -> i64 {
    3_600
}
fn default_token_secret_env() -> String {
    "CURIA_SERVICE_TOKEN_SECRET".into()
}
fn default_service_token_ttl() -> i64 {
    3_600
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| GatewayError::Config {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| GatewayError::Config {
            reason: format!("cannot parse {}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.max_rounds == 0 {
            return Err(GatewayError::Config {
                reason: "max_rounds must be at least 1".into(),
            });
        }
        for (role, names) in &self.roles_to_capabilities {
            for name in names {
                if !self.capabilities.contains_key(name) {
                    tracing::warn!(
                        role = %role,
                        capability = %name,
                        "role mapping references unconfigured capability"
                    );
                }
            }
        }
        Ok(())
    }

    /// Build the capability registry from the configured tables.
    pub fn registry(&self) -> CapabilityRegistry {
        let descriptors = self
            .capabilities
            .iter()
            .map(|(name, endpoint)| CapabilityDescriptor {
                name: name.clone(),
                url: endpoint.url.clone(),
                credential_source: endpoint.credential_source.clone(),
            })
            .collect();
        CapabilityRegistry::new(
            descriptors,
            self.roles_to_capabilities.clone(),
            self.full_access_roles.clone(),
        )
    }

    /// Derive the orchestration loop configuration.
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut config = OrchestratorConfig {
            model: self.llm.model.clone(),
            max_rounds: self.max_rounds,
            max_parallel_tool_calls: self.max_parallel_tool_calls,
            history_turns: self.history_turns_in_context,
            temperature: self.llm.temperature,
            dangerous_patterns: self.dangerous_patterns.clone(),
            token_budget_chars: self.token_budget_chars,
            ..OrchestratorConfig::default()
        };
        if let Some(prompt) = &self.system_prompt {
            config.system_prompt = prompt.clone();
        }
        config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        mode = "development"

        [llm]
        model = "gpt-test"
    "#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.mode, DeploymentMode::Development);
        assert_eq!(config.max_rounds, 8);
        assert_eq!(config.max_parallel_tool_calls, 4);
        assert_eq!(config.history_turns_in_context, 5);
        assert_eq!(config.token_budget_chars, 16_000);
        assert_eq!(config.cache_scope, CacheScope::CallerRoles);
        assert!((config.request_deadline_s - 180.0).abs() < f64::EPSILON);
        assert!(!config.dangerous_patterns.is_empty());
    }

    #[test]
    fn mode_is_required() {
        let result: std::result::Result<Config, _> = toml::from_str(
            r#"
            [llm]
            model = "gpt-test"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn full_config_parses() {
        let config: Config = toml::from_str(
            r#"
            mode = "production"
            bind_addr = "0.0.0.0:9000"
            max_rounds = 4
            dangerous_patterns = ["DROP TABLE"]
            cache_scope = "caller"
            full_access_roles = ["admin"]

            [llm]
            base_url = "https://llm.internal/v1"
            model = "gpt-enterprise"

            [capabilities.sales]
            url = "http://sales.internal:8080/rpc"

            [capabilities.graph]
            url = "http://graph.internal:8080/rpc"
            credential_source = "GRAPH_TOKEN"

            [roles_to_capabilities]
            sales_rep = ["sales"]
            sales_manager = ["sales", "graph"]
            "#,
        )
        .unwrap();

        assert_eq!(config.capabilities.len(), 2);
        assert_eq!(config.cache_scope, CacheScope::Caller);

        let registry = config.registry();
        let caps = registry.accessible(&["sales_manager".to_owned()]);
        assert_eq!(caps.len(), 2);
        let all = registry.accessible(&["admin".to_owned()]);
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn zero_max_rounds_is_invalid() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.max_rounds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn orchestrator_config_carries_overrides() {
        let mut config: Config = toml::from_str(MINIMAL).unwrap();
        config.system_prompt = Some("custom prompt".into());
        config.max_rounds = 3;

        let orch = config.orchestrator_config();
        assert_eq!(orch.max_rounds, 3);
        assert_eq!(orch.system_prompt, "custom prompt");
        assert_eq!(orch.model, "gpt-test");
    }
}
