//! Axum router construction for the lotsync server.
//!
//! Assembles the REST and `WebSocket` routes into a single [`Router`] with
//! CORS open to any origin, since viewers are served from other hosts.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// - `GET /health` -- change listener health
/// - `POST /update` -- device ingress
/// - `GET /status` -- current mirror
/// - `GET /ws` -- viewer `WebSocket`
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/update", post(handlers::update))
        .route("/status", get(handlers::status))
        .route("/ws", get(ws::ws_viewer))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
