//! Error types for the hub and its background tasks.

use lotsync_store::StoreError;

/// Errors raised by the hub, the change listener, and hub handles.
///
/// None of these stop the hub's event loop: store failures drop the event
/// being processed, unknown counters are logged and ignored, and a
/// terminated listener only takes the notification path down.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The store failed or timed out while serving a hub event.
    #[error("store error: {source}")]
    Store {
        /// The underlying store error.
        #[from]
        source: StoreError,
    },

    /// An event referenced a counter outside the configured set.
    #[error("unknown counter: {0}")]
    UnknownCounter(String),

    /// The change-notification subscription ended.
    ///
    /// Fatal to the notification path; the process supervisor must restart
    /// the listener. Reconciliation is the only healing path until then.
    #[error("change listener terminated: {0}")]
    ListenerTerminated(String),

    /// The hub's event loop has stopped and no longer accepts events.
    #[error("hub is closed")]
    HubClosed,
}

impl HubError {
    /// Whether the error is the transient `StoreUnavailable` class.
    pub const fn is_store_unavailable(&self) -> bool {
        match self {
            Self::Store { source } => source.is_unavailable(),
            _ => false,
        }
    }
}
