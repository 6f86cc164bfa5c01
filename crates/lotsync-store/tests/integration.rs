//! Integration tests for the Redis counter store.
//!
//! These tests require a live Redis server with keyspace notifications for
//! string commands enabled. Run with:
//!
//! ```bash
//! docker run --rm -p 6379:6379 redis redis-server --notify-keyspace-events 'K$'
//! cargo test -p lotsync-store -- --ignored
//! ```
//!
//! Tests that need the server are marked `#[ignore]` so they are skipped during normal
//! `cargo test` runs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::time::Duration;

use futures::StreamExt as _;
use lotsync_store::{CounterStore, RedisCounterStore, StoreError};

/// Redis connection URL for the local Docker instance.
const REDIS_URL: &str = "redis://127.0.0.1:6379/0";

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| (*s).to_owned()).collect()
}

async fn connect(namespace: &str) -> RedisCounterStore {
    RedisCounterStore::connect(REDIS_URL, namespace)
        .await
        .expect("Failed to connect to Redis -- is Docker running?")
}

#[tokio::test]
async fn rejects_empty_namespace() {
    let result = RedisCounterStore::connect(REDIS_URL, "").await;
    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[tokio::test]
#[ignore = "requires live Redis instance"]
async fn increment_and_read_back() {
    let store = connect("lotsync-test-incr").await;
    let counters = names(&["lot-a"]);
    store.clear(&counters).await.unwrap();

    assert_eq!(store.increment("lot-a", 5).await.unwrap(), 5);
    assert_eq!(store.increment("lot-a", -2).await.unwrap(), 3);
    assert_eq!(store.read_one("lot-a").await.unwrap(), Some(3));

    store.clear(&counters).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Redis instance"]
async fn batch_read_omits_missing_keys() {
    let store = connect("lotsync-test-batch").await;
    let counters = names(&["lot-a", "lot-b", "lot-c"]);
    store.clear(&counters).await.unwrap();

    store.set("lot-a", 3).await.unwrap();
    store.set("lot-b", 7).await.unwrap();

    let values = store.batch_read(&counters).await.unwrap();
    assert_eq!(values.get("lot-a"), Some(&3));
    assert_eq!(values.get("lot-b"), Some(&7));
    assert!(!values.contains_key("lot-c"));

    store.clear(&counters).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Redis instance"]
async fn increments_produce_notifications() {
    let store = connect("lotsync-test-notify").await;
    let counters = names(&["lot-a"]);
    store.clear(&counters).await.unwrap();

    let mut changes = store.subscribe_changes().await.unwrap();
    store.increment("lot-a", 1).await.unwrap();

    let name = tokio::time::timeout(Duration::from_secs(2), changes.next())
        .await
        .expect("no notification within 2s -- is notify-keyspace-events set?");
    assert_eq!(name.as_deref(), Some("lot-a"));

    store.clear(&counters).await.unwrap();
}

#[tokio::test]
#[ignore = "requires live Redis instance"]
async fn subscription_is_not_restartable() {
    let store = connect("lotsync-test-once").await;
    let _changes = store.subscribe_changes().await.unwrap();
    let second = store.subscribe_changes().await;
    assert!(second.is_err());
}
