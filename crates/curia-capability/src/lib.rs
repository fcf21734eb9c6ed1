//! Capability plane for Curia.
//!
//! A *capability server* is an external service exposing domain tools
//! (structured-data queries, graph traversal, document search) over a
//! two-operation JSON-RPC protocol.  This crate owns both sides of that
//! seam:
//!
//! - **[`registry`]** -- role-driven routing: which capability servers a
//!   caller's roles may reach, and where they live.
//! - **[`protocol`]** -- the wire types: JSON-RPC framing, tool
//!   descriptors, the execution result envelope.
//! - **[`client`]** -- the typed client for one server, with a pluggable
//!   transport and a one-retry-on-transient policy.
//! - **[`loader`]** -- lifecycle and pooling of clients, single-flight
//!   tool discovery, and the `"<capability>__<tool>"` namespacing rule.
//! - **[`service`]** -- the server-side contract: query executors,
//!   scope-derived row filtering, and the JSON-RPC dispatcher.
//! - **[`safety`]** -- the dangerous-statement blocklist shared by the
//!   pre-dispatch filters and the server side.

pub mod client;
pub mod error;
pub mod loader;
pub mod protocol;
pub mod registry;
pub mod safety;
pub mod service;

pub use client::{
    CapabilityClient, HttpTransport, HttpTransportFactory, ToolTransport, TransportFactory,
};
pub use error::{CapabilityError, Result};
pub use loader::{CapabilityLoader, NamespacedTool, PREFIX_SEPARATOR, ToolCatalog, prefixed_name};
pub use protocol::{
    CallToolParams, ExecutionResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse,
    ToolDescriptor,
};
pub use registry::{CapabilityDescriptor, CapabilityRegistry};
pub use safety::StatementBlocklist;
pub use service::{CapabilityService, LocalTransport, QueryExecutor, scope_predicate};
