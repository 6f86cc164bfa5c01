//! Change listener: forwards store change notifications into the hub.
//!
//! The listener does no buffering, deduplication, or transformation; every
//! notified name becomes one [`HubEvent::Change`](crate::hub::HubEvent). If
//! the subscription cannot be opened or ends, the listener marks itself
//! unhealthy and returns. Restarting it is the process supervisor's job;
//! until then only reconciliation keeps the mirror honest.
//!
//! A caller that needs no gap between bootstrap and subscription opens the
//! stream first and hands it to [`forward_changes`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt as _;
use lotsync_store::{ChangeStream, CounterStore};
use tokio::task::JoinHandle;
use tracing::{error, info, trace};

use crate::error::HubError;
use crate::hub::HubHandle;

/// Shared flag reporting whether the change subscription is live.
///
/// Starts unhealthy and flips to healthy once the subscription is open.
#[derive(Debug, Default)]
pub struct ListenerHealth {
    healthy: AtomicBool,
}

impl ListenerHealth {
    /// Create a flag in the unhealthy state.
    pub const fn new() -> Self {
        Self {
            healthy: AtomicBool::new(false),
        }
    }

    /// Whether the subscription is currently open.
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Record that the subscription is open.
    pub fn mark_healthy(&self) {
        self.healthy.store(true, Ordering::Release);
    }

    /// Record that the subscription is gone.
    pub fn mark_unhealthy(&self) {
        self.healthy.store(false, Ordering::Release);
    }
}

/// Open the change subscription and forward it to the hub.
///
/// # Errors
///
/// Returns [`HubError::ListenerTerminated`] if the subscription cannot be
/// opened or its stream ends. Returns `Ok(())` if the hub stops first.
pub async fn run_change_listener(
    store: Arc<dyn CounterStore>,
    hub: HubHandle,
    health: Arc<ListenerHealth>,
) -> Result<(), HubError> {
    let changes = match store.subscribe_changes().await {
        Ok(changes) => changes,
        Err(e) => {
            health.mark_unhealthy();
            error!(error = %e, "Failed to open change subscription");
            return Err(HubError::ListenerTerminated(e.to_string()));
        }
    };
    forward_changes(changes, hub, health).await
}

/// Forward an already open subscription to the hub until it ends.
///
/// Once live, one reconcile is queued so that any write which landed before
/// the subscription opened is picked up without waiting for the schedule.
///
/// # Errors
///
/// Returns [`HubError::ListenerTerminated`] when the stream ends. Returns
/// `Ok(())` if the hub stops first.
pub async fn forward_changes(
    mut changes: ChangeStream,
    hub: HubHandle,
    health: Arc<ListenerHealth>,
) -> Result<(), HubError> {
    health.mark_healthy();
    info!("Change listener started");

    if hub.request_reconcile().await.is_err() {
        hub_stopped(&health);
        return Ok(());
    }

    while let Some(counter) = changes.next().await {
        trace!(counter = %counter, "Forwarding change notification");
        if hub.notify_change(counter).await.is_err() {
            hub_stopped(&health);
            return Ok(());
        }
    }

    health.mark_unhealthy();
    error!("Change subscription ended; restart required to resume notifications");
    Err(HubError::ListenerTerminated(String::from(
        "change subscription ended",
    )))
}

fn hub_stopped(health: &ListenerHealth) {
    health.mark_unhealthy();
    info!("Hub closed, change listener stopping");
}

/// Spawn [`run_change_listener`] on its own task.
pub fn spawn_change_listener(
    store: Arc<dyn CounterStore>,
    hub: HubHandle,
    health: Arc<ListenerHealth>,
) -> JoinHandle<Result<(), HubError>> {
    tokio::spawn(run_change_listener(store, hub, health))
}

/// Spawn [`forward_changes`] on its own task.
pub fn spawn_forwarder(
    changes: ChangeStream,
    hub: HubHandle,
    health: Arc<ListenerHealth>,
) -> JoinHandle<Result<(), HubError>> {
    tokio::spawn(forward_changes(changes, hub, health))
}
