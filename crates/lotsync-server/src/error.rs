//! Error types for the lotsync HTTP surface.
//!
//! [`ApiError`] maps hub and store failures onto HTTP status codes and
//! renders them as a JSON body via its
//! [`IntoResponse`](axum::response::IntoResponse) implementation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lotsync_core::error::HubError;
use lotsync_store::StoreError;

/// Errors that can occur in the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The requested counter does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request body or parameters were malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The counter store is unreachable or too slow.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        if e.is_unavailable() {
            Self::StoreUnavailable(e.to_string())
        } else {
            Self::Internal(e.to_string())
        }
    }
}

impl From<HubError> for ApiError {
    fn from(e: HubError) -> Self {
        match e {
            HubError::Store { source } => source.into(),
            HubError::UnknownCounter(name) => Self::NotFound(format!("unknown lot: {name}")),
            other @ (HubError::ListenerTerminated(_) | HubError::HubClosed) => {
                Self::Internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            Self::StoreUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
