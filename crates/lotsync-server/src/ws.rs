//! `WebSocket` handler for viewers.
//!
//! Each connection becomes one viewer on the hub. The first frame is the
//! full state; afterwards the client receives every diff and keep-alive as
//! a JSON text frame. The viewer is detached when either side goes away.
//! A viewer the hub evicts for falling behind gets a close frame and is
//! expected to reconnect for a fresh full state.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a `WebSocket` viewer session.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_viewer(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_ws(socket, state))
}

/// Attach to the hub and pump messages until the connection ends.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>) {
    let (viewer, mut inbox) = match state.hub.connect_viewer(state.viewer_buffer).await {
        Ok(attached) => attached,
        Err(e) => {
            warn!(error = %e, "Could not attach viewer");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    debug!(%viewer, "Viewer connected");

    loop {
        tokio::select! {
            outgoing = inbox.recv() => {
                let Some(message) = outgoing else {
                    debug!(%viewer, "Hub released viewer, closing socket");
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                let json = match serde_json::to_string(&message) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!(%viewer, error = %e, "Failed to serialize viewer message");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!(%viewer, "Viewer disconnected (send failed)");
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(%viewer, "Viewer disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!(%viewer, "Viewer disconnected (pong failed)");
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        debug!(%viewer, error = %e, "WebSocket error");
                        break;
                    }
                    // Viewers are read-only.
                    _ => {}
                }
            }
        }
    }

    if state.hub.detach(viewer).await.is_err() {
        debug!(%viewer, "Hub already stopped at detach");
    }
}
