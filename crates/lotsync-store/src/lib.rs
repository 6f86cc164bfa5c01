//! Counter store accessor for lotsync.
//!
//! The store of record holds one integer per counter. Field devices mutate it
//! through [`CounterStore::increment`]; the hub reads it back after change
//! notifications and during reconciliation.
//!
//! # Architecture
//!
//! ```text
//! Ingress ----- increment ----> CounterStore <---- read_one / batch_read ---- Hub
//!                                   |
//!                                   +---- subscribe_changes ----> Change Listener
//! ```
//!
//! # Modules
//!
//! - [`store`] -- the [`CounterStore`] trait and stream/future aliases
//! - [`redis`] -- Redis backend with keyspace notifications
//! - [`memory`] -- in-memory backend for tests and local development
//! - [`error`] -- shared error types

pub mod error;
pub mod memory;
pub mod redis;
pub mod store;

// Re-export primary types for convenience.
pub use error::StoreError;
pub use memory::MemoryCounterStore;
pub use redis::RedisCounterStore;
pub use store::{ChangeStream, CounterStore, StoreFuture};
