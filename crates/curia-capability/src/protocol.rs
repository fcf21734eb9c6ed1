//! The tool-call protocol spoken between the orchestrator and capability
//! servers.
//!
//! JSON-RPC 2.0 over HTTP POST with two methods:
//!
//! - `tools/list` -- no params, returns `{"tools": [ToolDescriptor, ...]}`.
//! - `tools/call` -- params `{name, arguments, rbac_context}`, returns an
//!   [`ExecutionResult`] envelope.
//!
//! The RBAC context is serialized into every call; the server side must
//! re-derive authorization from it and must not trust the LLM-produced
//! arguments for identity.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use curia_auth::RbacContext;

// ---------------------------------------------------------------------------
// JSON-RPC types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be `"2.0"`.
    pub jsonrpc: String,
    /// Request identifier.
    #[serde(default)]
    pub id: Option<Value>,
    /// The method to invoke.
    pub method: String,
    /// Method parameters (defaults to `null` if absent).
    #[serde(default)]
    pub params: Value,
}

impl JsonRpcRequest {
    /// Construct a request with the given id, method, and params.
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id: Some(id.into()),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoed from the request.
    pub id: Option<Value>,
    /// Present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (negative numbers are reserved by JSON-RPC).
    pub code: i32,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// Standard JSON-RPC error codes.
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Also used as the "schema mismatch" signal: a client receiving this code
/// from `tools/call` should invalidate its cached catalog for the
/// capability and rediscover.
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// Implementation-defined: the service credential was missing or invalid.
pub const UNAUTHORIZED: i32 = -32001;

impl JsonRpcResponse {
    /// Construct a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Construct an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tool descriptors
// ---------------------------------------------------------------------------

/// A tool as advertised by a capability server via `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Logical tool name, unique within its capability.
    pub name: String,
    /// Human-readable description shown to the LLM.
    pub description: String,
    /// JSON-Schema-style parameter object.
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Whether the parameter schema is structurally usable (a JSON object).
    /// Checked at discovery time; tools failing this are dropped.
    #[must_use]
    pub fn has_valid_schema(&self) -> bool {
        self.parameters.is_object()
    }
}

/// Parameters of a `tools/call` request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    /// The unprefixed tool name (from the capability's own catalog).
    pub name: String,
    /// Parsed argument object.
    #[serde(default)]
    pub arguments: Value,
    /// The caller's RBAC context, forwarded verbatim from request entry.
    pub rbac_context: RbacContext,
}

// ---------------------------------------------------------------------------
// Execution result envelope
// ---------------------------------------------------------------------------

/// The envelope every capability server returns from `tools/call`.
///
/// The orchestrator depends only on this shape; what produced the rows
/// (SQL, graph traversal, document search) is opaque to it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Whether the execution succeeded.
    pub success: bool,

    /// Number of rows/records produced.
    #[serde(default)]
    pub row_count: u64,

    /// Column names for tabular results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    /// A small sample of rows for the LLM-facing summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rows: Option<Vec<Value>>,

    /// The full result set, when small enough to return inline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<Value>>,

    /// Error message when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Data source tag (`"sql"`, `"graph"`, ...).
    pub source: String,

    /// Echo of the executed query, for observability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,

    /// Canonical entity names resolved from fuzzy mentions, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_accounts: Option<Vec<String>>,
}

impl ExecutionResult {
    /// A failed execution with the given source and error message.
    pub fn failure(source: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            source: source.into(),
            error: Some(error.into()),
            ..Self::default()
        }
    }

    /// A successful tabular execution.
    pub fn rows(source: impl Into<String>, rows: Vec<Value>) -> Self {
        let sample: Vec<Value> = rows.iter().take(3).cloned().collect();
        Self {
            success: true,
            row_count: rows.len() as u64,
            sample_rows: Some(sample),
            data: Some(rows),
            source: source.into(),
            ..Self::default()
        }
    }

    /// Attach the executed query echo.
    #[must_use]
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }
}

/// Build the `tools/call` params value for the wire.
pub fn call_params(name: &str, arguments: Value, rbac: &RbacContext) -> Value {
    json!({
        "name": name,
        "arguments": arguments,
        "rbac_context": rbac,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
