//! Shared application state for the lotsync HTTP server.
//!
//! [`AppState`] bundles what the handlers need: the hub handle for viewer
//! and snapshot traffic, the store for ingress increments, the configured
//! counter names, and the listener health flag.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use lotsync_core::hub::HubHandle;
use lotsync_core::listener::ListenerHealth;
use lotsync_store::CounterStore;

/// Default per-viewer outbound buffer.
const DEFAULT_VIEWER_BUFFER: usize = 16;

/// Default deadline for ingress store calls.
const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(500);

/// Shared state handed to every handler.
pub struct AppState {
    /// Submission handle for the state hub.
    pub hub: HubHandle,
    /// Store of record, used directly by the ingress endpoint.
    pub store: Arc<dyn CounterStore>,
    /// Configured counter names; ingress for any other name is rejected.
    pub counters: BTreeSet<String>,
    /// Whether the change listener is running.
    pub health: Arc<ListenerHealth>,
    /// Outbound buffer size for each WebSocket viewer.
    pub viewer_buffer: usize,
    /// Deadline for ingress store calls.
    pub store_timeout: Duration,
}

impl AppState {
    /// Create application state with default viewer buffer and timeout.
    pub fn new(
        hub: HubHandle,
        store: Arc<dyn CounterStore>,
        counters: BTreeSet<String>,
        health: Arc<ListenerHealth>,
    ) -> Self {
        Self {
            hub,
            store,
            counters,
            health,
            viewer_buffer: DEFAULT_VIEWER_BUFFER,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Override the per-viewer outbound buffer.
    #[must_use]
    pub const fn with_viewer_buffer(mut self, viewer_buffer: usize) -> Self {
        self.viewer_buffer = viewer_buffer;
        self
    }

    /// Override the ingress store deadline.
    #[must_use]
    pub const fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Whether `lot` is a configured counter.
    pub fn is_known(&self, lot: &str) -> bool {
        self.counters.contains(lot)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub", &self.hub)
            .field("counters", &self.counters)
            .field("healthy", &self.health.is_healthy())
            .field("viewer_buffer", &self.viewer_buffer)
            .finish_non_exhaustive()
    }
}
