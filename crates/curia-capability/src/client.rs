//! Capability client.
//!
//! [`CapabilityClient`] speaks the two-operation tool protocol to a single
//! capability server through a [`ToolTransport`].  The production transport
//! is HTTP ([`HttpTransport`]); tests and embedded deployments supply their
//! own.
//!
//! Retry contract: at most one retry, and only on transient transport
//! failures.  Application-level errors (a server-side SQL failure, a
//! JSON-RPC error) are surfaced, never retried.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use curia_auth::RbacContext;

use crate::error::{CapabilityError, Result};
use crate::protocol::{
    ExecutionResult, JsonRpcRequest, JsonRpcResponse, ToolDescriptor, call_params,
};
use crate::registry::CapabilityDescriptor;

// ---------------------------------------------------------------------------
// Transport seam
// ---------------------------------------------------------------------------

/// One round of the tool protocol against a single capability server.
///
/// Implementations must be cheap to share (`Arc`) and safe to call
/// concurrently.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Fetch the server's tool catalog.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invoke a tool with the caller's RBAC context attached.
    async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        rbac: &RbacContext,
    ) -> Result<ExecutionResult>;
}

/// Builds transports for capability descriptors.  The loader owns one
/// factory for the process lifetime.
pub trait TransportFactory: Send + Sync {
    /// Create a transport for the given capability endpoint.
    fn create(&self, descriptor: &CapabilityDescriptor) -> Result<Arc<dyn ToolTransport>>;
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Typed client for one capability server.
pub struct CapabilityClient {
    name: String,
    transport: Arc<dyn ToolTransport>,
}

impl CapabilityClient {
    /// Create a client for the named capability over the given transport.
    pub fn new(name: impl Into<String>, transport: Arc<dyn ToolTransport>) -> Self {
        Self {
            name: name.into(),
            transport,
        }
    }

    /// The capability name this client talks to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the tool catalog, retrying once on transient failure.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        match self.transport.list_tools().await {
            Ok(tools) => Ok(tools),
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    capability = %self.name,
                    error = %e,
                    "tool discovery failed, retrying once"
                );
                self.transport.list_tools().await
            }
            Err(e) => Err(e),
        }
    }

    /// Invoke a tool, retrying once on transient transport failure.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Value,
        rbac: &RbacContext,
    ) -> Result<ExecutionResult> {
        match self.transport.call_tool(tool, arguments.clone(), rbac).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_transient() => {
                tracing::warn!(
                    capability = %self.name,
                    tool = %tool,
                    error = %e,
                    "tool call transport failure, retrying once"
                );
                self.transport.call_tool(tool, arguments, rbac).await
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP transport
// ---------------------------------------------------------------------------

/// JSON-RPC-over-HTTP transport to one capability server.
pub struct HttpTransport {
    http: reqwest::Client,
    endpoint: String,
    bearer: String,
    call_timeout: Duration,
    request_seq: AtomicU64,
}

impl HttpTransport {
    /// Create a transport for `endpoint`, authenticating with `bearer`.
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        bearer: impl Into<String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            bearer: bearer.into(),
            call_timeout,
            request_seq: AtomicU64::new(1),
        }
    }

    /// Perform one JSON-RPC round trip.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.request_seq.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.bearer)
            .timeout(self.call_timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CapabilityError::Timeout {
                        timeout_secs: self.call_timeout.as_secs(),
                    }
                } else {
                    CapabilityError::Transport {
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CapabilityError::Transport {
                reason: format!("endpoint returned {status}"),
            });
        }

        let response: JsonRpcResponse =
            response
                .json()
                .await
                .map_err(|e| CapabilityError::Decode {
                    reason: format!("invalid json-rpc response: {e}"),
                })?;

        if let Some(err) = response.error {
            return Err(CapabilityError::Rpc {
                code: err.code,
                message: err.message,
            });
        }

        response.result.ok_or_else(|| CapabilityError::Decode {
            reason: "json-rpc response has neither result nor error".into(),
        })
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.rpc("tools/list", Value::Null).await?;
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
        let params = call_params(tool, arguments, rbac);
        let result = self.rpc("tools/call", params).await?;
        serde_json::from_value(result).map_err(|e| CapabilityError::Decode {
            reason: format!("invalid tools/call envelope: {e}"),
        })
    }
}

/// Factory producing [`HttpTransport`] instances that share one connection
/// pool and one service credential.
pub struct HttpTransportFactory {
    http: reqwest::Client,
    bearer: String,
    call_timeout: Duration,
}

impl HttpTransportFactory {
    /// Create a factory with the orchestrator's service credential.
    pub fn new(bearer: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            bearer: bearer.into(),
            call_timeout,
        }
    }
}

impl TransportFactory for HttpTransportFactory {
    fn create(&self, descriptor: &CapabilityDescriptor) -> Result<Arc<dyn ToolTransport>> {
        Ok(Arc::new(HttpTransport::new(
            self.http.clone(),
            descriptor.url.clone(),
            self.bearer.clone(),
            self.call_timeout,
        )))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
