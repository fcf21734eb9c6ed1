//! Public HTTP endpoint and wiring for Curia.
//!
//! The gateway owns the request pipeline: extract the RBAC context from
//! the caller token, map roles to accessible capabilities, run the
//! orchestration loop under the request deadline, persist the completed
//! turn, and answer with a JSON document.  The chat backend and the
//! capability transport factory are injected seams, so the whole pipeline
//! runs against scripted backends in tests.

pub mod api;
pub mod config;
pub mod error;
pub mod server;
pub mod state;

pub use api::{AskRequest, AskResponse, FeedbackRequest};
pub use config::{CapabilityEndpoint, Config, LlmSettings};
pub use error::{GatewayError, Result};
pub use server::{GatewayServer, router};
pub use state::{AppState, DEADLINE_APOLOGY, POLICY_REFUSAL, RuntimeSettings};
