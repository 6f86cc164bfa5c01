//! The state hub: a single task that owns the counter mirror and the viewer
//! set.
//!
//! Every mutation of either happens while processing exactly one
//! [`HubEvent`], taken in queue order from one bounded channel. Producers
//! (the change listener, the reconciler, the heartbeat, HTTP handlers and
//! WebSocket sessions) reach the hub only through a cloneable [`HubHandle`].
//!
//! # Event handling
//!
//! ```text
//!  ViewerAttached --> add viewer, send FullStateUpdate
//!  ViewerDetached --> remove viewer (idempotent)
//!  Change(name)   --> read_one(name); if it differs, update mirror + DiffUpdate to all
//!  Snapshot       --> reply with the mirror, no store access
//!  Reconcile      --> batch_read all; fix and broadcast every discrepancy
//!  Heartbeat      --> KeepAlive to all
//! ```
//!
//! Store calls are the only suspension points while an event is processed.
//! Each is bounded by the configured store timeout; a failed or timed-out
//! call drops the event and the hub carries on.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use lotsync_store::{CounterStore, StoreError};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::model::{Counter, Diff, Snapshot, ViewerId, ViewerMessage};

/// Reply channel for a [`HubEvent::Change`].
pub type ChangeReply = oneshot::Sender<Result<ChangeOutcome, HubError>>;

/// Reply channel for a [`HubEvent::Reconcile`].
pub type ReconcileReply = oneshot::Sender<Result<ReconcileReport, HubError>>;

/// One unit of work for the hub.
#[derive(Debug)]
pub enum HubEvent {
    /// A viewer connected and wants updates on `outbox`.
    ViewerAttached {
        /// The new viewer.
        viewer: ViewerId,
        /// Where the hub delivers messages for this viewer.
        outbox: mpsc::Sender<ViewerMessage>,
    },
    /// A viewer went away.
    ViewerDetached {
        /// The departing viewer.
        viewer: ViewerId,
    },
    /// The store reported that `counter` may have changed.
    Change {
        /// Name of the counter to refetch.
        counter: String,
        /// Optional channel receiving the outcome.
        reply: Option<ChangeReply>,
    },
    /// Someone wants the current mirror.
    SnapshotRequest {
        /// Channel receiving the snapshot.
        reply: oneshot::Sender<Snapshot>,
    },
    /// Compare the mirror against the store and heal any drift.
    Reconcile {
        /// Optional channel receiving the report.
        reply: Option<ReconcileReply>,
    },
    /// Send a liveness marker to every viewer.
    Heartbeat,
}

/// What processing a change event did to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOutcome {
    /// The stored value differed; the mirror was updated and a diff sent.
    Applied {
        /// Occupancy before the change.
        previous: i64,
        /// Occupancy now mirrored.
        current: i64,
    },
    /// The stored value matched the mirror; nothing was sent.
    Unchanged {
        /// The mirrored occupancy.
        occupancy: i64,
    },
    /// The store has no value for the counter; the mirror was left alone.
    Absent,
}

/// One counter whose mirrored value disagreed with the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discrepancy {
    /// Counter name.
    pub counter: String,
    /// Value the mirror held.
    pub mirror: i64,
    /// Value the store holds (now mirrored).
    pub store: i64,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Counters that were corrected.
    pub discrepancies: Vec<Discrepancy>,
    /// Names the store returned that are not configured (ignored).
    pub unknown: Vec<String>,
    /// Configured counters the store holds no value for (left unchanged).
    pub missing: Vec<String>,
}

impl ReconcileReport {
    /// Whether the mirror already agreed with the store.
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// The hub's state. Owned by exactly one task once [spawned](Self::spawn).
pub struct Hub {
    mirror: BTreeMap<String, Counter>,
    names: Vec<String>,
    viewers: BTreeMap<ViewerId, mpsc::Sender<ViewerMessage>>,
    store: Arc<dyn CounterStore>,
    store_timeout: Duration,
}

impl Hub {
    /// Create a hub mirroring `counters` without consulting the store.
    pub fn new(
        counters: impl IntoIterator<Item = Counter>,
        store: Arc<dyn CounterStore>,
        store_timeout: Duration,
    ) -> Self {
        let mirror: BTreeMap<String, Counter> = counters
            .into_iter()
            .map(|counter| (counter.name.clone(), counter))
            .collect();
        let names = mirror.keys().cloned().collect();
        Self {
            mirror,
            names,
            viewers: BTreeMap::new(),
            store,
            store_timeout,
        }
    }

    /// Create a hub and overlay the store's current values onto the
    /// configured counters.
    ///
    /// Counters absent from the store keep their configured initial value.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] if the initial read fails or times out.
    pub async fn bootstrap(
        counters: impl IntoIterator<Item = Counter>,
        store: Arc<dyn CounterStore>,
        store_timeout: Duration,
    ) -> Result<Self, HubError> {
        let mut hub = Self::new(counters, store, store_timeout);
        let stored = bounded(
            "batch_read",
            hub.store_timeout,
            hub.store.batch_read(&hub.names),
        )
        .await?;

        for (name, value) in stored {
            if let Some(counter) = hub.mirror.get_mut(&name) {
                warn_if_negative(&name, value);
                counter.occupancy = value;
            } else {
                warn!(counter = %name, "Store returned a counter outside the configured set");
            }
        }

        info!(counters = hub.mirror.len(), "Hub bootstrapped from store");
        Ok(hub)
    }

    /// A copy of the mirror.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            counters: self.mirror.clone(),
        }
    }

    /// Number of attached viewers.
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Add a viewer and send it the full state.
    ///
    /// Attaching an id that is already present replaces its outbox.
    pub fn attach(&mut self, viewer: ViewerId, outbox: mpsc::Sender<ViewerMessage>) {
        let message = ViewerMessage::from(self.snapshot());
        if deliver(viewer, &outbox, message) {
            self.viewers.insert(viewer, outbox);
            debug!(%viewer, viewers = self.viewers.len(), "Viewer attached");
        }
    }

    /// Remove a viewer. Returns whether it was attached.
    pub fn detach(&mut self, viewer: ViewerId) -> bool {
        let removed = self.viewers.remove(&viewer).is_some();
        if removed {
            debug!(%viewer, viewers = self.viewers.len(), "Viewer detached");
        }
        removed
    }

    /// Refetch one counter and broadcast a diff if it moved.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownCounter`] for a name outside the mirror and
    /// [`HubError::Store`] if the read fails or times out. Neither touches
    /// the mirror.
    pub async fn apply_change(&mut self, name: &str) -> Result<ChangeOutcome, HubError> {
        if !self.mirror.contains_key(name) {
            warn!(counter = name, "Change for unknown counter ignored");
            return Err(HubError::UnknownCounter(name.to_owned()));
        }

        let stored = bounded("read_one", self.store_timeout, self.store.read_one(name)).await?;
        let Some(current) = stored else {
            debug!(counter = name, "Counter absent from store, change dropped");
            return Ok(ChangeOutcome::Absent);
        };

        let previous = match self.mirror.get_mut(name) {
            Some(counter) if counter.occupancy == current => {
                return Ok(ChangeOutcome::Unchanged { occupancy: current });
            }
            Some(counter) => std::mem::replace(&mut counter.occupancy, current),
            None => return Err(HubError::UnknownCounter(name.to_owned())),
        };

        warn_if_negative(name, current);
        debug!(counter = name, previous, current, "Counter changed");
        self.broadcast(&ViewerMessage::from(Diff {
            counter_name: name.to_owned(),
            new_occupancy: current,
        }));
        Ok(ChangeOutcome::Applied { previous, current })
    }

    /// Compare every configured counter against the store and repair drift.
    ///
    /// Each corrected counter is broadcast as a diff. Running it twice with
    /// no intervening store change leaves the second report clean.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] if the batch read fails or times out; the
    /// mirror is unchanged in that case.
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, HubError> {
        let stored = bounded(
            "batch_read",
            self.store_timeout,
            self.store.batch_read(&self.names),
        )
        .await?;

        let mut report = ReconcileReport {
            missing: self
                .names
                .iter()
                .filter(|name| !stored.contains_key(*name))
                .cloned()
                .collect(),
            ..ReconcileReport::default()
        };

        for (name, value) in stored {
            let Some(counter) = self.mirror.get_mut(&name) else {
                warn!(counter = %name, "Store returned a counter outside the configured set");
                report.unknown.push(name);
                continue;
            };
            if counter.occupancy == value {
                continue;
            }

            let mirrored = std::mem::replace(&mut counter.occupancy, value);
            warn!(
                counter = %name,
                mirror = mirrored,
                store = value,
                "Reconciliation found a missed update"
            );
            warn_if_negative(&name, value);
            self.broadcast(&ViewerMessage::from(Diff {
                counter_name: name.clone(),
                new_occupancy: value,
            }));
            report.discrepancies.push(Discrepancy {
                counter: name,
                mirror: mirrored,
                store: value,
            });
        }

        info!(
            discrepancies = report.discrepancies.len(),
            unknown = report.unknown.len(),
            missing = report.missing.len(),
            "Reconciliation complete"
        );
        Ok(report)
    }

    /// Send a liveness marker to every viewer.
    pub fn heartbeat(&mut self) {
        self.broadcast(&ViewerMessage::KeepAlive);
    }

    /// Deliver `message` to every viewer attached right now.
    ///
    /// Viewers whose outbox has closed or is full are removed. Dropping the
    /// outbox ends the viewer's session, and reconnecting starts over from a
    /// fresh full state.
    fn broadcast(&mut self, message: &ViewerMessage) {
        self.viewers
            .retain(|viewer, outbox| deliver(*viewer, outbox, message.clone()));
    }

    /// Handle one event to completion.
    pub async fn process(&mut self, event: HubEvent) {
        match event {
            HubEvent::ViewerAttached { viewer, outbox } => self.attach(viewer, outbox),
            HubEvent::ViewerDetached { viewer } => {
                self.detach(viewer);
            }
            HubEvent::Change { counter, reply } => {
                let outcome = self.apply_change(&counter).await;
                if let Err(HubError::Store { source }) = &outcome {
                    warn!(counter = %counter, error = %source, "Store read failed, change dropped");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(outcome);
                }
            }
            HubEvent::SnapshotRequest { reply } => {
                let _ = reply.send(self.snapshot());
            }
            HubEvent::Reconcile { reply } => {
                let report = self.reconcile().await;
                if let Err(e) = &report {
                    warn!(error = %e, "Reconciliation skipped");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(report);
                }
            }
            HubEvent::Heartbeat => self.heartbeat(),
        }
    }

    /// Process events until every [`HubHandle`] has been dropped.
    pub async fn run(mut self, mut events: mpsc::Receiver<HubEvent>) {
        info!(
            counters = self.mirror.len(),
            store_timeout_ms = duration_ms(self.store_timeout),
            "Hub running"
        );
        while let Some(event) = events.recv().await {
            self.process(event).await;
        }
        info!("Hub stopped: all handles dropped");
    }

    /// Start the hub on its own task.
    ///
    /// Returns the handle producers use and the task's join handle.
    pub fn spawn(self, queue_capacity: usize) -> (HubHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let task = tokio::spawn(self.run(rx));
        (HubHandle { tx }, task)
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("counters", &self.names)
            .field("viewers", &self.viewers.len())
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

/// Cloneable submission handle for the hub.
///
/// Every method fails with [`HubError::HubClosed`] once the hub task has
/// stopped.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubEvent>,
}

impl HubHandle {
    /// Attach a viewer with a caller-provided outbox.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubClosed`] if the hub has stopped.
    pub async fn attach(
        &self,
        viewer: ViewerId,
        outbox: mpsc::Sender<ViewerMessage>,
    ) -> Result<(), HubError> {
        self.submit(HubEvent::ViewerAttached { viewer, outbox }).await
    }

    /// Attach a new viewer with an outbox of `buffer` messages.
    ///
    /// The first message on the returned receiver is the full state.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubClosed`] if the hub has stopped.
    pub async fn connect_viewer(
        &self,
        buffer: usize,
    ) -> Result<(ViewerId, mpsc::Receiver<ViewerMessage>), HubError> {
        let viewer = ViewerId::new();
        let (outbox, inbox) = mpsc::channel(buffer.max(1));
        self.attach(viewer, outbox).await?;
        Ok((viewer, inbox))
    }

    /// Detach a viewer. Detaching an unknown viewer is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubClosed`] if the hub has stopped.
    pub async fn detach(&self, viewer: ViewerId) -> Result<(), HubError> {
        self.submit(HubEvent::ViewerDetached { viewer }).await
    }

    /// Queue a change event without waiting for it to be processed.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubClosed`] if the hub has stopped.
    pub async fn notify_change(&self, counter: impl Into<String>) -> Result<(), HubError> {
        self.submit(HubEvent::Change {
            counter: counter.into(),
            reply: None,
        })
        .await
    }

    /// Queue a change event and wait for its outcome.
    ///
    /// # Errors
    ///
    /// Returns whatever processing the event produced
    /// ([`HubError::UnknownCounter`], [`HubError::Store`]) or
    /// [`HubError::HubClosed`].
    pub async fn change(&self, counter: impl Into<String>) -> Result<ChangeOutcome, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubEvent::Change {
            counter: counter.into(),
            reply: Some(reply),
        })
        .await?;
        rx.await.map_err(|_closed| HubError::HubClosed)?
    }

    /// Fetch a copy of the mirror.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubClosed`] if the hub has stopped.
    pub async fn snapshot(&self) -> Result<Snapshot, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubEvent::SnapshotRequest { reply }).await?;
        rx.await.map_err(|_closed| HubError::HubClosed)
    }

    /// Queue a reconciliation without waiting for it.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubClosed`] if the hub has stopped.
    pub async fn request_reconcile(&self) -> Result<(), HubError> {
        self.submit(HubEvent::Reconcile { reply: None }).await
    }

    /// Run a reconciliation and wait for its report.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::Store`] if the store could not be read, or
    /// [`HubError::HubClosed`].
    pub async fn reconcile(&self) -> Result<ReconcileReport, HubError> {
        let (reply, rx) = oneshot::channel();
        self.submit(HubEvent::Reconcile { reply: Some(reply) }).await?;
        rx.await.map_err(|_closed| HubError::HubClosed)?
    }

    /// Queue a heartbeat.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::HubClosed`] if the hub has stopped.
    pub async fn heartbeat(&self) -> Result<(), HubError> {
        self.submit(HubEvent::Heartbeat).await
    }

    /// Whether the hub task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn submit(&self, event: HubEvent) -> Result<(), HubError> {
        self.tx.send(event).await.map_err(|_closed| HubError::HubClosed)
    }
}

/// Try to hand `message` to one viewer. Returns whether to keep the viewer.
fn deliver(viewer: ViewerId, outbox: &mpsc::Sender<ViewerMessage>, message: ViewerMessage) -> bool {
    match outbox.try_send(message) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(%viewer, "Viewer buffer full, evicting viewer");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(%viewer, "Viewer outbox closed, removing viewer");
            false
        }
    }
}

/// Run a store call under a deadline.
async fn bounded<T>(
    operation: &'static str,
    timeout: Duration,
    call: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_elapsed| StoreError::Timeout {
            operation,
            timeout_ms: duration_ms(timeout),
        })?
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn warn_if_negative(name: &str, value: i64) {
    if value < 0 {
        warn!(counter = name, occupancy = value, "Store holds a negative occupancy");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use lotsync_store::MemoryCounterStore;

    use super::*;

    const TIMEOUT: Duration = Duration::from_millis(500);

    fn counters() -> Vec<Counter> {
        vec![Counter::new("A", 0, 10), Counter::new("B", 0, 20)]
    }

    fn hub_with(store: &Arc<MemoryCounterStore>) -> Hub {
        Hub::new(counters(), Arc::clone(store) as Arc<dyn CounterStore>, TIMEOUT)
    }

    fn viewer(hub: &mut Hub) -> (ViewerId, mpsc::Receiver<ViewerMessage>) {
        let id = ViewerId::new();
        let (tx, rx) = mpsc::channel(8);
        hub.attach(id, tx);
        (id, rx)
    }

    #[tokio::test]
    async fn bootstrap_overlays_store_values() {
        let store = Arc::new(MemoryCounterStore::with_values([("A", 3), ("ghost", 9)]));
        let hub = Hub::bootstrap(counters(), store, TIMEOUT).await.unwrap();
        let snapshot = hub.snapshot();
        assert_eq!(snapshot.occupancy("A"), Some(3));
        assert_eq!(snapshot.occupancy("B"), Some(0));
        assert_eq!(snapshot.occupancy("ghost"), None);
    }

    #[tokio::test]
    async fn bootstrap_fails_when_store_is_down() {
        let store = Arc::new(MemoryCounterStore::new());
        store.set_available(false);
        let result = Hub::bootstrap(counters(), store, TIMEOUT).await;
        assert!(result.is_err_and(|e| e.is_store_unavailable()));
    }

    #[tokio::test]
    async fn attach_sends_full_state() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut hub = hub_with(&store);
        let (_, mut rx) = viewer(&mut hub);

        let first = rx.try_recv().unwrap();
        assert_eq!(first, ViewerMessage::from(hub.snapshot()));
        assert_eq!(hub.viewer_count(), 1);
    }

    #[tokio::test]
    async fn change_updates_mirror_and_broadcasts() {
        let store = Arc::new(MemoryCounterStore::with_values([("A", 4)]));
        let mut hub = hub_with(&store);
        let (_, mut rx1) = viewer(&mut hub);
        let (_, mut rx2) = viewer(&mut hub);
        let _ = rx1.try_recv();
        let _ = rx2.try_recv();

        let outcome = hub.apply_change("A").await.unwrap();
        assert_eq!(outcome, ChangeOutcome::Applied { previous: 0, current: 4 });
        assert_eq!(hub.snapshot().occupancy("A"), Some(4));

        let expected = ViewerMessage::DiffUpdate {
            lot: String::from("A"),
            occupancy: 4,
        };
        assert_eq!(rx1.try_recv().unwrap(), expected);
        assert_eq!(rx2.try_recv().unwrap(), expected);
    }

    #[tokio::test]
    async fn unchanged_value_sends_nothing() {
        let store = Arc::new(MemoryCounterStore::with_values([("A", 0)]));
        let mut hub = hub_with(&store);
        let (_, mut rx) = viewer(&mut hub);
        let _ = rx.try_recv();

        let outcome = hub.apply_change("A").await.unwrap();
        assert_eq!(outcome, ChangeOutcome::Unchanged { occupancy: 0 });
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn absent_value_leaves_mirror() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut hub = hub_with(&store);
        let outcome = hub.apply_change("B").await.unwrap();
        assert_eq!(outcome, ChangeOutcome::Absent);
        assert_eq!(hub.snapshot().occupancy("B"), Some(0));
    }

    #[tokio::test]
    async fn unknown_counter_never_enters_mirror() {
        let store = Arc::new(MemoryCounterStore::with_values([("Z", 1)]));
        let mut hub = hub_with(&store);
        let result = hub.apply_change("Z").await;
        assert!(matches!(result, Err(HubError::UnknownCounter(ref name)) if name == "Z"));
        assert_eq!(hub.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn negative_values_are_mirrored() {
        let store = Arc::new(MemoryCounterStore::with_values([("A", -2)]));
        let mut hub = hub_with(&store);
        let outcome = hub.apply_change("A").await.unwrap();
        assert_eq!(outcome, ChangeOutcome::Applied { previous: 0, current: -2 });
    }

    #[tokio::test]
    async fn detach_is_idempotent() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut hub = hub_with(&store);
        let (id, _rx) = viewer(&mut hub);

        assert!(hub.detach(id));
        assert!(!hub.detach(id));
        assert!(!hub.detach(ViewerId::new()));
        assert_eq!(hub.viewer_count(), 0);
    }

    #[tokio::test]
    async fn closed_viewers_are_pruned_on_broadcast() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut hub = hub_with(&store);
        let (_, rx) = viewer(&mut hub);
        let (_, mut alive) = viewer(&mut hub);
        drop(rx);

        hub.heartbeat();
        assert_eq!(hub.viewer_count(), 1);
        let _ = alive.try_recv();
        assert_eq!(alive.try_recv().unwrap(), ViewerMessage::KeepAlive);
    }

    #[tokio::test]
    async fn full_viewer_buffer_evicts_viewer() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut hub = hub_with(&store);
        let (tx, mut rx) = mpsc::channel(1);
        hub.attach(ViewerId::new(), tx);

        hub.heartbeat();
        assert_eq!(hub.viewer_count(), 0);
        hub.heartbeat();

        assert!(matches!(rx.recv().await, Some(ViewerMessage::FullStateUpdate { .. })));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn reconcile_heals_missed_update() {
        let store = Arc::new(MemoryCounterStore::with_values([("A", 3), ("B", 5)]));
        let mut hub = Hub::bootstrap(counters(), Arc::clone(&store) as Arc<dyn CounterStore>, TIMEOUT)
            .await
            .unwrap();
        let (_, mut rx) = viewer(&mut hub);
        let _ = rx.try_recv();

        store.set_silently("B", 7).unwrap();
        let report = hub.reconcile().await.unwrap();

        assert_eq!(
            report.discrepancies,
            vec![Discrepancy {
                counter: String::from("B"),
                mirror: 5,
                store: 7,
            }]
        );
        assert_eq!(hub.snapshot().occupancy("B"), Some(7));
        assert_eq!(
            rx.try_recv().unwrap(),
            ViewerMessage::DiffUpdate {
                lot: String::from("B"),
                occupancy: 7
            }
        );
        assert!(rx.try_recv().is_err());

        let again = hub.reconcile().await.unwrap();
        assert!(again.is_clean());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reconcile_reports_missing_counters() {
        let store = Arc::new(MemoryCounterStore::with_values([("A", 1)]));
        let mut hub = hub_with(&store);
        let report = hub.reconcile().await.unwrap();
        assert_eq!(report.missing, vec![String::from("B")]);
        assert_eq!(hub.snapshot().occupancy("B"), Some(0));
    }

    #[tokio::test]
    async fn store_failure_keeps_mirror() {
        let store = Arc::new(MemoryCounterStore::with_values([("A", 8)]));
        let mut hub = hub_with(&store);
        store.set_available(false);

        assert!(hub.apply_change("A").await.is_err());
        assert!(hub.reconcile().await.is_err());
        assert_eq!(hub.snapshot().occupancy("A"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out() {
        let store = Arc::new(MemoryCounterStore::with_values([("A", 8)]));
        let mut hub = hub_with(&store);
        store.set_latency(Duration::from_secs(5));

        let result = hub.apply_change("A").await;
        assert!(matches!(
            result,
            Err(HubError::Store {
                source: StoreError::Timeout {
                    operation: "read_one",
                    timeout_ms: 500
                }
            })
        ));
    }
}
