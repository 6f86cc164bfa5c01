//! In-memory counter store.
//!
//! A thread-safe [`CounterStore`] over a `BTreeMap` with a broadcast channel
//! standing in for keyspace notifications. It is used by tests and for local
//! development without a Redis server.
//!
//! Besides the trait contract it exposes knobs to simulate the failure modes
//! the hub has to survive: an unreachable store, a slow store, writes whose
//! notification is lost, and a notification channel that goes away.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures::{FutureExt as _, StreamExt as _};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use crate::error::StoreError;
use crate::store::{ChangeStream, CounterStore, StoreFuture};

/// Capacity of the notification channel.
///
/// A subscriber that falls further behind than this skips ahead, which is
/// the same coalescing a real keyspace subscription may exhibit.
const NOTIFICATION_CAPACITY: usize = 1024;

fn lock_err(context: &'static str) -> StoreError {
    StoreError::Unavailable(format!("poisoned lock: {context}"))
}

/// In-memory [`CounterStore`].
#[derive(Debug)]
pub struct MemoryCounterStore {
    values: Mutex<BTreeMap<String, i64>>,
    notifier: Mutex<Option<broadcast::Sender<String>>>,
    available: AtomicBool,
    latency_ms: AtomicU64,
}

impl MemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            values: Mutex::new(BTreeMap::new()),
            notifier: Mutex::new(Some(tx)),
            available: AtomicBool::new(true),
            latency_ms: AtomicU64::new(0),
        }
    }

    /// Create a store pre-populated with the given counters.
    pub fn with_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let store = Self::new();
        if let Ok(mut map) = store.values.lock() {
            map.extend(values.into_iter().map(|(name, value)| (name.into(), value)));
        }
        store
    }

    /// Overwrite a counter and publish a change notification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the internal lock is poisoned.
    pub fn set(&self, name: &str, value: i64) -> Result<(), StoreError> {
        self.set_silently(name, value)?;
        self.notify(name);
        Ok(())
    }

    /// Overwrite a counter without publishing a notification.
    ///
    /// Simulates a mutation whose notification was lost in transit.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the internal lock is poisoned.
    pub fn set_silently(&self, name: &str, value: i64) -> Result<(), StoreError> {
        let mut map = self.values.lock().map_err(|_poisoned| lock_err("values"))?;
        map.insert(name.to_owned(), value);
        Ok(())
    }

    /// Publish a change notification without touching the value.
    ///
    /// Simulates an at-least-once duplicate delivery.
    pub fn notify(&self, name: &str) {
        if let Ok(guard) = self.notifier.lock() {
            if let Some(tx) = guard.as_ref() {
                // send fails only when nobody is subscribed, which is fine.
                let _ = tx.send(name.to_owned());
            }
        }
    }

    /// Current stored value, bypassing availability and latency simulation.
    pub fn value(&self, name: &str) -> Option<i64> {
        self.values
            .lock()
            .ok()
            .and_then(|map| map.get(name).copied())
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    /// Delay every subsequent operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::Release);
    }

    /// Drop the notification channel, ending every open subscription.
    ///
    /// Further calls to [`CounterStore::subscribe_changes`] fail.
    pub fn close_notifications(&self) {
        if let Ok(mut guard) = self.notifier.lock() {
            guard.take();
        }
    }

    async fn enter(&self, operation: &'static str) -> Result<(), StoreError> {
        let latency = self.latency_ms.load(Ordering::Acquire);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.available.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "memory store offline during {operation}"
            )))
        }
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for MemoryCounterStore {
    fn increment<'a>(&'a self, name: &'a str, delta: i64) -> StoreFuture<'a, i64> {
        async move {
            self.enter("increment").await?;
            let value = {
                let mut map = self.values.lock().map_err(|_poisoned| lock_err("values"))?;
                let entry = map.entry(name.to_owned()).or_insert(0);
                let next = entry.checked_add(delta).ok_or_else(|| StoreError::InvalidValue {
                    key: name.to_owned(),
                    reason: String::from("increment would overflow"),
                })?;
                *entry = next;
                next
            };
            self.notify(name);
            Ok(value)
        }
        .boxed()
    }

    fn batch_read<'a>(&'a self, names: &'a [String]) -> StoreFuture<'a, BTreeMap<String, i64>> {
        async move {
            self.enter("batch_read").await?;
            let map = self.values.lock().map_err(|_poisoned| lock_err("values"))?;
            Ok(names
                .iter()
                .filter_map(|name| map.get(name).map(|value| (name.clone(), *value)))
                .collect())
        }
        .boxed()
    }

    fn read_one<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<i64>> {
        async move {
            self.enter("read_one").await?;
            let map = self.values.lock().map_err(|_poisoned| lock_err("values"))?;
            Ok(map.get(name).copied())
        }
        .boxed()
    }

    fn subscribe_changes(&self) -> StoreFuture<'_, ChangeStream> {
        async move {
            self.enter("subscribe_changes").await?;
            let rx = {
                let guard = self.notifier.lock().map_err(|_poisoned| lock_err("notifier"))?;
                guard
                    .as_ref()
                    .map(broadcast::Sender::subscribe)
                    .ok_or_else(|| {
                        StoreError::Unavailable(String::from("notification channel closed"))
                    })?
            };

            let stream = futures::stream::unfold(rx, |mut rx| async move {
                loop {
                    match rx.recv().await {
                        Ok(name) => return Some((name, rx)),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Change subscription lagged");
                        }
                        Err(RecvError::Closed) => return None,
                    }
                }
            });
            Ok(stream.boxed())
        }
        .boxed()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_owned()).collect()
    }

    #[tokio::test]
    async fn increment_starts_from_zero() {
        let store = MemoryCounterStore::new();
        let value = store.increment("lot-a", 3).await;
        assert!(matches!(value, Ok(3)));
        let value = store.increment("lot-a", -1).await;
        assert!(matches!(value, Ok(2)));
    }

    #[tokio::test]
    async fn increment_overflow_is_rejected() {
        let store = MemoryCounterStore::with_values([("lot-a", i64::MAX)]);
        let result = store.increment("lot-a", 1).await;
        assert!(matches!(result, Err(StoreError::InvalidValue { .. })));
        assert_eq!(store.value("lot-a"), Some(i64::MAX));
    }

    #[tokio::test]
    async fn batch_read_omits_absent_names() {
        let store = MemoryCounterStore::with_values([("lot-a", 4), ("lot-b", 9)]);
        let result = store
            .batch_read(&names(&["lot-a", "lot-c"]))
            .await
            .unwrap_or_default();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("lot-a"), Some(&4));
        assert!(!result.contains_key("lot-c"));
    }

    #[tokio::test]
    async fn read_one_absent_is_none() {
        let store = MemoryCounterStore::new();
        assert!(matches!(store.read_one("ghost").await, Ok(None)));
    }

    #[tokio::test]
    async fn offline_store_is_unavailable() {
        let store = MemoryCounterStore::with_values([("lot-a", 1)]);
        store.set_available(false);
        let result = store.read_one("lot-a").await;
        assert!(result.is_err_and(|e| e.is_unavailable()));

        store.set_available(true);
        assert!(matches!(store.read_one("lot-a").await, Ok(Some(1))));
    }

    #[tokio::test]
    async fn increments_are_notified() {
        let store = MemoryCounterStore::new();
        let mut changes = store.subscribe_changes().await.unwrap();

        let _ = store.increment("lot-a", 1).await;
        let _ = store.increment("lot-b", 1).await;

        assert_eq!(changes.next().await.as_deref(), Some("lot-a"));
        assert_eq!(changes.next().await.as_deref(), Some("lot-b"));
    }

    #[tokio::test]
    async fn silent_writes_are_not_notified() {
        let store = MemoryCounterStore::new();
        let mut changes = store.subscribe_changes().await.unwrap();

        let _ = store.set_silently("lot-a", 7);
        let _ = store.set("lot-b", 2);

        assert_eq!(changes.next().await.as_deref(), Some("lot-b"));
        assert_eq!(store.value("lot-a"), Some(7));
    }

    #[tokio::test]
    async fn closing_notifications_ends_stream() {
        let store = MemoryCounterStore::new();
        let mut changes = store.subscribe_changes().await.unwrap();

        store.close_notifications();
        assert!(changes.next().await.is_none());
        assert!(store.subscribe_changes().await.is_err());
    }
}
