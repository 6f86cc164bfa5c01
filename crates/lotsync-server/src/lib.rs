//! HTTP and `WebSocket` surface for lotsync.
//!
//! This crate provides an Axum server that exposes:
//!
//! - **Ingress** (`POST /update`) where field devices report occupancy
//!   deltas; the delta goes straight to the store of record
//! - **Viewer `WebSocket`** (`GET /ws`) that attaches one hub viewer per
//!   connection and forwards full state, diffs, and keep-alives as JSON
//! - **Status** (`GET /status`) returning the hub's current mirror
//! - **Health** (`GET /health`) reflecting the change listener
//!
//! # Architecture
//!
//! Handlers never touch the mirror directly. Reads and viewer membership go
//! through the hub's [`HubHandle`](lotsync_core::hub::HubHandle); only the
//! ingress endpoint talks to the store.

pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use error::ApiError;
pub use router::build_router;
pub use server::{ServerConfig, ServerError, spawn_server, start_server};
pub use state::AppState;
