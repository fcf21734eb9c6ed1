//! Server-side capability contract.
//!
//! A capability server registers one or more [`QueryExecutor`]s with a
//! [`CapabilityService`], which speaks the JSON-RPC tool protocol: it
//! answers `tools/list` from the executors' catalogs and dispatches
//! `tools/call` to the owning executor.
//!
//! The service enforces the parts of the contract the orchestrator cannot:
//! it re-derives authorization from the forwarded RBAC context (never from
//! LLM-produced arguments), rejects dangerous statements, and resolves
//! fuzzy entity mentions through the account resolver before execution.
//!
//! [`LocalTransport`] adapts a service into a [`ToolTransport`] so a
//! capability can be embedded in-process (tests, single-binary
//! deployments) without HTTP in between.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};

use curia_auth::{RbacContext, verify_service_token};
use curia_resolver::AccountResolver;

use crate::client::ToolTransport;
use crate::error::{CapabilityError, Result};
use crate::protocol::{
    CallToolParams, ExecutionResult, INVALID_PARAMS, INVALID_REQUEST, JsonRpcRequest,
    JsonRpcResponse, METHOD_NOT_FOUND, ToolDescriptor, UNAUTHORIZED,
};
use crate::safety::StatementBlocklist;

// ---------------------------------------------------------------------------
// Executor contract
// ---------------------------------------------------------------------------

/// One query backend inside a capability server (SQL, graph, documents).
///
/// Implementations must derive row-level filters from the RBAC context;
/// access is never granted merely because the arguments mention an entity.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Data source tag stamped into result envelopes (`"sql"`, `"graph"`).
    fn source(&self) -> &str;

    /// The tools this executor serves.
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Execute one tool call.  Application failures are reported inside
    /// the envelope (`success: false`), not as protocol errors.
    async fn execute(&self, tool: &str, arguments: Value, rbac: &RbacContext)
    -> ExecutionResult;
}

/// Render the caller's scope as a SQL predicate over `entity_column`.
///
/// Admins and all-entity scopes see everything; an empty scope sees
/// nothing (`1=0`).  Entity IDs are quote-escaped.
#[must_use]
pub fn scope_predicate(rbac: &RbacContext, entity_column: &str, owner_column: &str) -> String {
    if rbac.admin || rbac.access_scope.all_entities {
        return "1=1".into();
    }

    let mut clauses = Vec::new();
    if !rbac.access_scope.entity_ids.is_empty() {
        let ids: Vec<String> = rbac
            .access_scope
            .entity_ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect();
        clauses.push(format!("{entity_column} IN ({})", ids.join(",")));
    }
    if rbac.access_scope.owned_only {
        clauses.push(format!(
            "{owner_column} = '{}'",
            rbac.caller_id.replace('\'', "''")
        ));
    }

    if clauses.is_empty() {
        "1=0".into()
    } else {
        clauses.join(" AND ")
    }
}

// ---------------------------------------------------------------------------
// Capability service
// ---------------------------------------------------------------------------

/// JSON-RPC front of one capability server.
pub struct CapabilityService {
    name: String,
    executors: Vec<Arc<dyn QueryExecutor>>,
    /// Tool name -> index into `executors`.
    tool_owner: HashMap<String, usize>,
    blocklist: StatementBlocklist,
    resolver: Option<Arc<AccountResolver>>,
    token_secret: Option<Vec<u8>>,
}

impl CapabilityService {
    /// Create a service for `name` over the given executors.
    pub fn new(
        name: impl Into<String>,
        executors: Vec<Arc<dyn QueryExecutor>>,
        blocklist: StatementBlocklist,
    ) -> Self {
        let mut tool_owner = HashMap::new();
        for (index, executor) in executors.iter().enumerate() {
            for tool in executor.tools() {
                if tool_owner.insert(tool.name.clone(), index).is_some() {
                    tracing::warn!(
                        tool = %tool.name,
                        "two executors register the same tool, last wins"
                    );
                }
            }
        }
        Self {
            name: name.into(),
            executors,
            tool_owner,
            blocklist,
            resolver: None,
            token_secret: None,
        }
    }

    /// Attach an account resolver for `accounts_mentioned` arguments.
    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<AccountResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Require and verify service tokens signed with `secret`.
    #[must_use]
    pub fn with_token_secret(mut self, secret: Vec<u8>) -> Self {
        self.token_secret = Some(secret);
        self
    }

    /// The capability name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full tool catalog across all executors.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.executors.iter().flat_map(|e| e.tools()).collect()
    }

    /// Handle one JSON-RPC request.
    pub async fn handle(&self, request: JsonRpcRequest, bearer: Option<&str>) -> JsonRpcResponse {
        let id = request.id.clone();

        if let Some(secret) = &self.token_secret {
            let Some(bearer) = bearer else {
                return JsonRpcResponse::error(id, UNAUTHORIZED, "missing service credential");
            };
            if let Err(e) = verify_service_token(bearer, secret) {
                tracing::warn!(capability = %self.name, error = %e, "service credential rejected");
                return JsonRpcResponse::error(id, UNAUTHORIZED, "invalid service credential");
            }
        }

        if request.jsonrpc != "2.0" {
            return JsonRpcResponse::error(id, INVALID_REQUEST, "jsonrpc must be \"2.0\"");
        }

        match request.method.as_str() {
            "tools/list" => {
                let tools = self.tools();
                JsonRpcResponse::success(id, json!({ "tools": tools }))
            }
            "tools/call" => {
                let params: CallToolParams = match serde_json::from_value(request.params) {
                    Ok(p) => p,
                    Err(e) => {
                        return JsonRpcResponse::error(
                            id,
                            INVALID_PARAMS,
                            format!("invalid tools/call params: {e}"),
                        );
                    }
                };

                match self.dispatch_call(params).await {
                    Ok(result) => JsonRpcResponse::success(
                        id,
                        serde_json::to_value(result)
                            .unwrap_or_else(|_| json!({"success": false})),
                    ),
                    Err(CapabilityError::UnknownTool { tool }) => JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        format!("unknown tool: {tool}"),
                    ),
                    Err(e) => JsonRpcResponse::error(
                        id,
                        crate::protocol::INTERNAL_ERROR,
                        e.to_string(),
                    ),
                }
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            other => {
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("unknown method: {other}"))
            }
        }
    }

    /// Execute a validated `tools/call`.
    pub async fn dispatch_call(&self, params: CallToolParams) -> Result<ExecutionResult> {
        let Some(&owner) = self.tool_owner.get(&params.name) else {
            return Err(CapabilityError::UnknownTool { tool: params.name });
        };
        let executor = &self.executors[owner];

        // Safety gate before anything touches a backend.
        if let Some(pattern) = self.blocklist.scan_arguments(&params.arguments) {
            tracing::warn!(
                capability = %self.name,
                tool = %params.name,
                pattern = %pattern,
                caller = %params.rbac_context.caller_id,
                "blocked dangerous statement"
            );
            return Ok(ExecutionResult::failure(
                executor.source(),
                format!("unsafe_payload: blocked pattern `{pattern}`"),
            ));
        }

        // Resolve fuzzy entity mentions within the caller's scope.
        let mut arguments = params.arguments;
        let mut resolved_names: Option<Vec<String>> = None;
        if let Some(resolver) = &self.resolver {
            let mentioned: Vec<String> = arguments["accounts_mentioned"]
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str())
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default();

            if !mentioned.is_empty() {
                let matches =
                    resolver.resolve_names(&mentioned, &params.rbac_context.access_scope);
                let names: Vec<String> =
                    matches.iter().map(|m| m.record.name.clone()).collect();
                tracing::debug!(
                    capability = %self.name,
                    mentioned = ?mentioned,
                    resolved = ?names,
                    "resolved account mentions"
                );
                arguments["resolved_accounts"] = json!(names);
                resolved_names = Some(names);
            }
        }

        let mut result = executor
            .execute(&params.name, arguments, &params.rbac_context)
            .await;
        if result.resolved_accounts.is_none() {
            result.resolved_accounts = resolved_names;
        }
        Ok(result)
    }

    /// Mount the service as an axum router (single JSON-RPC POST route).
    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/rpc", post(rpc_handler))
            .with_state(self)
    }
}

/// Axum handler: one JSON-RPC exchange.
async fn rpc_handler(
    State(service): State<Arc<CapabilityService>>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    let bearer = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    Json(service.handle(request, bearer).await)
}

// ---------------------------------------------------------------------------
// In-process transport
// ---------------------------------------------------------------------------

/// Adapts a [`CapabilityService`] into a [`ToolTransport`] with no HTTP in
/// between.
pub struct LocalTransport {
    service: Arc<CapabilityService>,
    bearer: Option<String>,
}

impl LocalTransport {
    /// Wrap a service; `bearer` is forwarded as the service credential.
    pub fn new(service: Arc<CapabilityService>, bearer: Option<String>) -> Self {
        Self { service, bearer }
    }
}

#[async_trait]
impl ToolTransport for LocalTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let request = JsonRpcRequest::new(0, "tools/list", Value::Null);
        let response = self.service.handle(request, self.bearer.as_deref()).await;
        if let Some(err) = response.error {
            return Err(CapabilityError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result = response.result.unwrap_or_default();
        serde_json::from_value(result["tools"].clone()).map_err(|e| CapabilityError::Decode {
            reason: format!("invalid tools/list payload: {e}"),
        })
    }

    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        rbac: &RbacContext,
    ) -> Result<ExecutionResult> {
        let params = crate::protocol::call_params(tool, arguments, rbac);
        let request = JsonRpcRequest::new(0, "tools/call", params);
        let response = self.service.handle(request, self.bearer.as_deref()).await;
        if let Some(err) = response.error {
            return Err(CapabilityError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result = response.result.ok_or_else(|| CapabilityError::Decode {
            reason: "tools/call returned no result".into(),
        })?;
        serde_json::from_value(result).map_err(|e| CapabilityError::Decode {
            reason: format!("invalid tools/call envelope: {e}"),
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use curia_auth::{AccessScope, mint_service_token};
    use curia_resolver::{AccountRecord, ResolverConfig};

    /// Executor that returns the caller-visible rows for a fixed table,
    /// honoring the scope predicate the way a real SQL backend would.
    struct FakeSqlExecutor;

    #[async_trait]
    impl QueryExecutor for FakeSqlExecutor {
        fn source(&self) -> &str {
            "sql"
        }

        fn tools(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: "query_sql".into(),
                description: "Run a read-only SQL query".into(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "accounts_mentioned": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["query"]
                }),
            }]
        }

        async fn execute(
            &self,
            _tool: &str,
            arguments: Value,
            rbac: &RbacContext,
        ) -> ExecutionResult {
            let rows = vec![
                json!({"account_id": "acc-ms", "revenue": 125000}),
                json!({"account_id": "acc-fb", "revenue": 43000}),
            ];
            let visible: Vec<Value> = rows
                .into_iter()
                .filter(|r| {
                    rbac.can_access_entity(r["account_id"].as_str().unwrap_or_default())
                })
                .collect();

            ExecutionResult::rows("sql", visible)
                .with_query(arguments["query"].as_str().unwrap_or_default())
        }
    }

    fn rbac(scope: AccessScope) -> RbacContext {
        RbacContext {
            caller_id: "alice@example.com".into(),
            tenant_id: "t1".into(),
            object_id: "o1".into(),
            roles: vec!["sales_rep".into()],
            admin: false,
            access_scope: scope,
        }
    }

    fn service() -> CapabilityService {
        CapabilityService::new(
            "sales",
            vec![Arc::new(FakeSqlExecutor)],
            StatementBlocklist::new(StatementBlocklist::default_patterns()),
        )
    }

    fn call_request(arguments: Value, scope: AccessScope) -> JsonRpcRequest {
        JsonRpcRequest::new(
            1,
            "tools/call",
            crate::protocol::call_params("query_sql", arguments, &rbac(scope)),
        )
    }

    #[tokio::test]
    async fn lists_tools() {
        let service = service();
        let response = service
            .handle(JsonRpcRequest::new(1, "tools/list", Value::Null), None)
            .await;
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 1);
    }

    #[tokio::test]
    async fn scope_limits_rows() {
        let service = service();
        let response = service
            .handle(
                call_request(
                    json!({"query": "SELECT * FROM revenue"}),
                    AccessScope::for_entities(["acc-ms"]),
                ),
                None,
            )
            .await;
        let result: ExecutionResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(result.success);
        assert_eq!(result.row_count, 1);
    }

    #[tokio::test]
    async fn empty_scope_returns_zero_rows() {
        let service = service();
        let response = service
            .handle(
                call_request(json!({"query": "SELECT 1"}), AccessScope::default()),
                None,
            )
            .await;
        let result: ExecutionResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(result.success);
        assert_eq!(result.row_count, 0);
    }

    #[tokio::test]
    async fn dangerous_statement_is_blocked() {
        let service = service();
        let response = service
            .handle(
                call_request(
                    json!({"query": "DROP TABLE accounts"}),
                    AccessScope::unrestricted(),
                ),
                None,
            )
            .await;
        let result: ExecutionResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unsafe_payload"));
    }

    #[tokio::test]
    async fn unknown_tool_is_schema_mismatch_signal() {
        let service = service();
        let request = JsonRpcRequest::new(
            1,
            "tools/call",
            crate::protocol::call_params(
                "missing_tool",
                json!({}),
                &rbac(AccessScope::unrestricted()),
            ),
        );
        let response = service.handle(request, None).await;
        assert_eq!(response.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn mentions_are_resolved_and_echoed() {
        let resolver = Arc::new(AccountResolver::new(ResolverConfig::default()));
        resolver
            .fit(vec![AccountRecord {
                id: "acc-ms".into(),
                name: "Microsoft".into(),
                description: Some("cloud software".into()),
                industry: Some("technology".into()),
                entity_type: None,
                aliases: vec![],
            }])
            .unwrap();

        let service = service().with_resolver(resolver);
        let response = service
            .handle(
                call_request(
                    json!({"query": "SELECT 1", "accounts_mentioned": ["Microsoft"]}),
                    AccessScope::unrestricted(),
                ),
                None,
            )
            .await;
        let result: ExecutionResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.resolved_accounts.unwrap(), vec!["Microsoft"]);
    }

    #[tokio::test]
    async fn out_of_scope_mention_resolves_to_nothing() {
        let resolver = Arc::new(AccountResolver::new(ResolverConfig::default()));
        resolver
            .fit(vec![AccountRecord {
                id: "acc-secret".into(),
                name: "Initech".into(),
                description: None,
                industry: None,
                entity_type: None,
                aliases: vec![],
            }])
            .unwrap();

        let service = service().with_resolver(resolver);
        let response = service
            .handle(
                call_request(
                    json!({"query": "SELECT 1", "accounts_mentioned": ["Initech"]}),
                    AccessScope::for_entities(["acc-other"]),
                ),
                None,
            )
            .await;
        let result: ExecutionResult =
            serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.resolved_accounts.unwrap(), Vec::<String>::new());
    }

    #[tokio::test]
    async fn service_token_is_enforced() {
        let secret = b"capability-secret".to_vec();
        let service = service().with_token_secret(secret.clone());

        let denied = service
            .handle(JsonRpcRequest::new(1, "tools/list", Value::Null), None)
            .await;
        assert_eq!(denied.error.unwrap().code, UNAUTHORIZED);

        let token = mint_service_token("orchestrator", &secret, 60);
        let allowed = service
            .handle(
                JsonRpcRequest::new(1, "tools/list", Value::Null),
                Some(&token),
            )
            .await;
        assert!(allowed.error.is_none());
    }

    #[tokio::test]
    async fn local_transport_round_trip() {
        let service = Arc::new(service());
        let transport = LocalTransport::new(service, None);

        let tools = transport.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "query_sql");

        let result = transport
            .call_tool(
                "query_sql",
                json!({"query": "SELECT 1"}),
                &rbac(AccessScope::unrestricted()),
            )
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.row_count, 2);
    }

    #[test]
    fn scope_predicate_variants() {
        let admin = RbacContext {
            admin: true,
            ..rbac(AccessScope::default())
        };
        assert_eq!(scope_predicate(&admin, "account_id", "owner_email"), "1=1");

        let scoped = rbac(AccessScope::for_entities(["acc-1", "acc-2"]));
        assert_eq!(
            scope_predicate(&scoped, "account_id", "owner_email"),
            "account_id IN ('acc-1','acc-2')"
        );

        let mut owned = rbac(AccessScope::default());
        owned.access_scope.owned_only = true;
        assert_eq!(
            scope_predicate(&owned, "account_id", "owner_email"),
            "owner_email = 'alice@example.com'"
        );

        let nothing = rbac(AccessScope::default());
        assert_eq!(scope_predicate(&nothing, "account_id", "owner_email"), "1=0");
    }
}
