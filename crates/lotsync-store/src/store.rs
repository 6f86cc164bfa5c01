//! The [`CounterStore`] trait: the seam between the hub and the store of
//! record.
//!
//! The trait is object-safe so the rest of the system can hold an
//! `Arc<dyn CounterStore>` and swap the Redis backend for the in-memory one
//! in tests and local development.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::error::StoreError;

/// A lazy, infinite, non-restartable stream of changed counter names.
///
/// Delivery is at-least-once and may coalesce rapid successive mutations of
/// the same counter. The stream ends when the underlying subscription is
/// lost; a fresh subscription must be opened to resume.
pub type ChangeStream = BoxStream<'static, String>;

/// Boxed future returned by every [`CounterStore`] operation.
pub type StoreFuture<'a, T> = BoxFuture<'a, Result<T, StoreError>>;

/// Access to the authoritative counter values.
pub trait CounterStore: Send + Sync {
    /// Atomically add `delta` (may be negative) to the counter and return the
    /// new stored value.
    fn increment<'a>(&'a self, name: &'a str, delta: i64) -> StoreFuture<'a, i64>;

    /// Read all requested counters in one atomic operation.
    ///
    /// Names absent in the store are omitted from the result, not defaulted.
    fn batch_read<'a>(&'a self, names: &'a [String]) -> StoreFuture<'a, BTreeMap<String, i64>>;

    /// Read a single counter. Returns `None` when the counter is absent.
    fn read_one<'a>(&'a self, name: &'a str) -> StoreFuture<'a, Option<i64>>;

    /// Open the change-notification subscription.
    fn subscribe_changes(&self) -> StoreFuture<'_, ChangeStream>;
}
