//! Counter state and the messages pushed to viewers.
//!
//! The wire shapes of [`ViewerMessage`] carry a `header` field naming the
//! message kind, so a browser client can dispatch on a single property:
//!
//! ```json
//! {"header":"FullStateUpdate","counters":{"lot-a":{"name":"lot-a","occupancy":2,"capacity":10}}}
//! {"header":"DiffUpdate","lot":"lot-a","occupancy":4}
//! {"header":"KeepAlive"}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One named counter (a parking lot).
///
/// Identity is `name`; `capacity` never changes after startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Unique counter name.
    pub name: String,
    /// Current occupancy as last read from the store.
    pub occupancy: i64,
    /// Maximum occupancy.
    pub capacity: u32,
}

impl Counter {
    /// Create a counter.
    pub fn new(name: impl Into<String>, occupancy: i64, capacity: u32) -> Self {
        Self {
            name: name.into(),
            occupancy,
            capacity,
        }
    }
}

/// Full copy of every counter at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    /// Counters keyed by name.
    pub counters: BTreeMap<String, Counter>,
}

impl Snapshot {
    /// Occupancy of `name`, if the counter exists.
    pub fn occupancy(&self, name: &str) -> Option<i64> {
        self.counters.get(name).map(|counter| counter.occupancy)
    }

    /// Name to occupancy, without capacities.
    pub fn occupancies(&self) -> BTreeMap<String, i64> {
        self.counters
            .iter()
            .map(|(name, counter)| (name.clone(), counter.occupancy))
            .collect()
    }

    /// Number of counters.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Whether the snapshot holds no counters.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

/// A single-counter update broadcast to every viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// The counter that changed.
    pub counter_name: String,
    /// Its new occupancy.
    pub new_occupancy: i64,
}

/// Message delivered to a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "header")]
pub enum ViewerMessage {
    /// Complete state, sent once when a viewer attaches.
    FullStateUpdate {
        /// Every counter keyed by name.
        counters: Snapshot,
    },
    /// One counter changed.
    DiffUpdate {
        /// The counter that changed.
        lot: String,
        /// Its new occupancy.
        occupancy: i64,
    },
    /// Liveness marker sent on every heartbeat.
    KeepAlive,
}

impl From<Diff> for ViewerMessage {
    fn from(diff: Diff) -> Self {
        Self::DiffUpdate {
            lot: diff.counter_name,
            occupancy: diff.new_occupancy,
        }
    }
}

impl From<Snapshot> for ViewerMessage {
    fn from(counters: Snapshot) -> Self {
        Self::FullStateUpdate { counters }
    }
}

/// Opaque handle for one connected viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ViewerId(pub Uuid);

impl ViewerId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ViewerId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for ViewerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}
