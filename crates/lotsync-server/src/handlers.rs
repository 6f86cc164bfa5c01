//! REST endpoint handlers for the lotsync server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | 200 while the change listener runs, 503 otherwise |
//! | `POST` | `/update` | Apply a device delta to one lot in the store |
//! | `GET` | `/status` | Current mirror of every lot |

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use lotsync_core::model::Snapshot;
use lotsync_store::StoreError;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Body of `POST /update`, sent by field devices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotUpdate {
    /// The lot whose occupancy changed.
    pub lot: String,
    /// Signed change in occupancy (e.g. `1` on entry, `-1` on exit).
    pub diff: i64,
}

/// Response body of `POST /update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotOccupancy {
    /// The lot that was updated.
    pub lot: String,
    /// Its occupancy after the update.
    pub occupancy: i64,
}

/// Report whether the server can keep viewers current.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.health.is_healthy() {
        (StatusCode::OK, "Server is up!")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "Change listener is down")
    }
}

/// Apply a device delta to the store.
///
/// The viewers learn about the change through the store's notification,
/// not from this handler.
///
/// # Errors
///
/// Returns [`ApiError::BadRequest`] for a malformed body,
/// [`ApiError::NotFound`] for an unconfigured lot, and
/// [`ApiError::StoreUnavailable`] if the store cannot be reached in time.
pub async fn update(
    State(state): State<Arc<AppState>>,
    body: Result<Json<LotUpdate>, JsonRejection>,
) -> Result<Json<LotOccupancy>, ApiError> {
    let Json(update) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;

    if !state.is_known(&update.lot) {
        warn!(lot = %update.lot, "Update for unknown lot rejected");
        return Err(ApiError::NotFound(format!("unknown lot: {}", update.lot)));
    }

    let occupancy = tokio::time::timeout(
        state.store_timeout,
        state.store.increment(&update.lot, update.diff),
    )
    .await
    .map_err(|_elapsed| StoreError::Timeout {
        operation: "increment",
        timeout_ms: u64::try_from(state.store_timeout.as_millis()).unwrap_or(u64::MAX),
    })??;

    debug!(lot = %update.lot, diff = update.diff, occupancy, "Lot updated");
    Ok(Json(LotOccupancy {
        lot: update.lot,
        occupancy,
    }))
}

/// Return the hub's current mirror.
///
/// # Errors
///
/// Returns [`ApiError::Internal`] if the hub has stopped.
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<Snapshot>, ApiError> {
    let snapshot = state.hub.snapshot().await?;
    Ok(Json(snapshot))
}
