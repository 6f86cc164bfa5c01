//! Error types for the lotsync binary.
//!
//! [`AppError`] wraps every failure mode during startup and serving so that
//! `main` can propagate with `?`.

/// Top-level error for the lotsync binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: lotsync_core::config::ConfigError,
    },

    /// Connecting to the counter store failed.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: lotsync_store::StoreError,
    },

    /// The hub could not be bootstrapped.
    #[error("hub error: {source}")]
    Hub {
        /// The underlying hub error.
        #[from]
        source: lotsync_core::error::HubError,
    },

    /// The HTTP server failed to start or stopped.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: lotsync_server::ServerError,
    },

    /// A background task panicked or was cancelled.
    #[error("task error: {message}")]
    Task {
        /// Description of the task failure.
        message: String,
    },
}
