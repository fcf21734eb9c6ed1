//! HTTP server setup.
//!
//! Composes the Axum router and starts the listener.  The router is
//! exposed separately so tests can serve it on an ephemeral port.

use std::sync::Arc;

use axum::Router;
use axum::http::Method;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};

use crate::api;
use crate::state::AppState;

/// Build the public router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/v1/health", get(api::health))
        .route("/v1/ask", post(api::ask))
        .route("/v1/feedback", post(api::feedback))
        .layer(cors)
        .with_state(state)
}

/// The gateway HTTP server.
pub struct GatewayServer {
    state: Arc<AppState>,
    bind_addr: String,
}

impl GatewayServer {
    /// Create a server over the shared state.
    pub fn new(state: Arc<AppState>, bind_addr: impl Into<String>) -> Self {
        Self {
            state,
            bind_addr: bind_addr.into(),
        }
    }

    /// Bind and serve until shutdown.  Closes all capability clients on
    /// exit.
    pub async fn start(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_addr).await?;
        tracing::info!(addr = %self.bind_addr, "gateway listening");

        let loader = Arc::clone(&self.state.loader);
        let result = axum::serve(listener, router(self.state)).await;
        loader.close_all();
        result
    }
}
