// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tally_config::GatewayConfig;
use tally_core::TallyError;
use tally_lifecycle::Registry;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<Registry>,
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
    /// Cancelled on shutdown; in-flight discovery scans use child tokens.
    pub shutdown: CancellationToken,
}

impl GatewayState {
    pub fn new(registry: Arc<Registry>, shutdown: CancellationToken) -> Self {
        Self {
            registry,
            start_time: std::time::Instant::now(),
            shutdown,
        }
    }
}

/// Gateway server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token for `/v1/*` (None = auth disabled).
    pub bearer_token: Option<String>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[redacted]"))
            .finish()
    }
}

impl From<&GatewayConfig> for ServerConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            bearer_token: config.bearer_token.clone(),
        }
    }
}

/// Build the router.
///
/// - `GET /health` (public)
/// - `POST /v1/plugins/discover`
/// - `GET /v1/plugins`, `GET /v1/plugins/{name}`
/// - `POST /v1/plugins/validate`, `POST /v1/plugins/install`
/// - `POST /v1/plugins/{name}/update`, `DELETE /v1/plugins/{name}`
/// - `GET /v1/installed`, `GET /v1/installed/{name}/health`
pub fn router(state: GatewayState, bearer_token: Option<String>) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::get_public_health))
        .with_state(state.clone());

    let mut api_routes = Router::new()
        .route("/v1/plugins/discover", post(handlers::post_discover))
        .route("/v1/plugins/validate", post(handlers::post_validate))
        .route("/v1/plugins/install", post(handlers::post_install))
        .route("/v1/plugins", get(handlers::get_plugins))
        .route(
            "/v1/plugins/{name}",
            get(handlers::get_plugin).delete(handlers::delete_plugin),
        )
        .route("/v1/plugins/{name}/update", post(handlers::post_update))
        .route("/v1/installed", get(handlers::get_installed))
        .route("/v1/installed/{name}/health", get(handlers::get_installed_health));

    match bearer_token {
        Some(token) => {
            api_routes = api_routes.route_layer(axum_middleware::from_fn_with_state(
                AuthConfig {
                    bearer_token: token,
                },
                auth_middleware,
            ));
        }
        None => tracing::warn!("gateway auth disabled; /v1 routes are open"),
    }

    Router::new()
        .merge(public_routes)
        .merge(api_routes.with_state(state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serve the gateway until `state.shutdown` is cancelled.
pub async fn start_server(config: &ServerConfig, state: GatewayState) -> Result<(), TallyError> {
    let shutdown = state.shutdown.clone();
    let app = router(state, config.bearer_token.clone());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| TallyError::Unavailable(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| TallyError::Internal(format!("gateway server error: {e}")))?;

    tracing::info!("gateway stopped");
    Ok(())
}
