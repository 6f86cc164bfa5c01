//! HTTP server lifecycle management.
//!
//! [`start_server`] binds and serves in the current task; [`spawn_server`]
//! binds eagerly, so address errors surface at startup, and then serves on
//! a background task.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::router::build_router;
use crate::state::AppState;

/// Listener address for the server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The host address to bind to (e.g. `0.0.0.0`).
    pub host: String,
    /// The TCP port to listen on; `0` picks a free port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: String::from("0.0.0.0"),
            port: 9000,
        }
    }
}

/// Errors that can occur when starting or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to the network address.
    #[error("bind error: {0}")]
    Bind(String),

    /// The server encountered a fatal error while serving.
    #[error("serve error: {0}")]
    Serve(String),
}

async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| ServerError::Bind(format!("invalid address: {e}")))?;

    TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind(format!("bind failed on {addr}: {e}")))
}

async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    axum::serve(listener, build_router(state))
        .await
        .map_err(|e| ServerError::Serve(format!("serve error: {e}")))
}

/// Bind and serve requests until the process is terminated.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or taken, and
/// [`ServerError::Serve`] on a fatal I/O error while serving.
pub async fn start_server(config: &ServerConfig, state: Arc<AppState>) -> Result<(), ServerError> {
    let listener = bind(config).await?;
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "lotsync server listening");
    }
    serve(listener, state).await
}

/// Bind now and serve on a background task.
///
/// Returns the bound address and the task handle.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address is invalid or taken.
pub async fn spawn_server(
    config: &ServerConfig,
    state: Arc<AppState>,
) -> Result<(SocketAddr, JoinHandle<Result<(), ServerError>>), ServerError> {
    let listener = bind(config).await?;
    let addr = listener
        .local_addr()
        .map_err(|e| ServerError::Bind(format!("no local address: {e}")))?;
    info!(%addr, "lotsync server listening");

    let handle = tokio::spawn(async move {
        let result = serve(listener, state).await;
        if let Err(e) = &result {
            error!(error = %e, "lotsync server exited with error");
        }
        result
    });
    Ok((addr, handle))
}
