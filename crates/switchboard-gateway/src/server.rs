// SPDX-FileCopyrightText: 2026 Switchboard Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state. The operator surface under
//! `/internal/*` requires the shared secret; `/health` and the artifact
//! download path are public; the subscriber channel authenticates during
//! its own handshake.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use switchboard_config::SwitchboardConfig;
use switchboard_core::SwitchboardError;
use switchboard_session::SessionRegistry;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::artifact::ArtifactStore;
use crate::auth::{operator_auth_middleware, AuthConfig};
use crate::handlers;
use crate::hub::SubscriberHub;
use crate::ws;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    pub hub: Arc<SubscriberHub>,
    pub artifacts: Arc<ArtifactStore>,
    pub config: Arc<SwitchboardConfig>,
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        let config = Arc::clone(registry.config());
        let artifacts = Arc::new(ArtifactStore::new(config.gateway.artifact_dir.clone()));
        Self {
            registry,
            hub: Arc::new(SubscriberHub::new()),
            artifacts,
            config,
            start_time: Instant::now(),
        }
    }
}

/// Build the full gateway router.
pub fn build_router(state: GatewayState) -> Router {
    let auth_state = AuthConfig {
        operator_secret: state.config.gateway.operator_secret.clone(),
    };

    // Unauthenticated public routes.
    let public_routes = Router::new()
        .route("/health", get(handlers::get_health))
        .route(
            "/artifacts/{session_id}/{name}",
            get(handlers::get_artifact_file),
        )
        .with_state(state.clone());

    // Operator surface: shared-secret bearer auth.
    let operator_routes = Router::new()
        .route("/internal/init", post(handlers::post_init))
        .route("/internal/prompt", post(handlers::post_prompt))
        .route("/internal/ws-token", post(handlers::post_ws_token))
        .route(
            "/internal/participants",
            get(handlers::get_participants).post(handlers::post_participants),
        )
        .route("/internal/messages", get(handlers::get_messages))
        .route("/internal/events", get(handlers::get_events))
        .route("/internal/state", get(handlers::get_state))
        .route("/internal/artifacts", get(handlers::get_artifacts))
        .route("/internal/stop", post(handlers::post_stop))
        .route("/internal/archive", post(handlers::post_archive))
        .route("/internal/unarchive", post(handlers::post_unarchive))
        .route("/internal/sandbox-event", post(handlers::post_sandbox_event))
        .route(
            "/sessions/{session_id}/artifact",
            post(handlers::post_artifact_upload),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            operator_auth_middleware,
        ))
        .with_state(state.clone());

    // Subscriber channel (auth happens during the handshake).
    let ws_routes = Router::new()
        .route("/ws/{session_id}", get(ws::ws_handler))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(operator_routes)
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
}

/// Bind and serve until the cancellation token fires.
pub async fn start_server(
    state: GatewayState,
    cancel: CancellationToken,
) -> Result<(), SwitchboardError> {
    let addr = format!(
        "{}:{}",
        state.config.gateway.host, state.config.gateway.port
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| SwitchboardError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| SwitchboardError::Internal(format!("gateway server error: {e}")))?;

    Ok(())
}
