//! State hub, change listener, and reconciliation for lotsync.
//!
//! This crate owns the in-memory mirror of every parking-lot counter and
//! keeps connected viewers in step with the store of record. All mutation
//! flows through one hub task; everything else talks to it by message.
//!
//! # Modules
//!
//! - [`model`] -- counters, snapshots, diffs, and viewer wire messages.
//! - [`hub`] -- the [`Hub`] event loop and its [`HubHandle`].
//! - [`listener`] -- forwards store change notifications into the hub.
//! - [`reconciler`] -- schedules periodic full comparisons against the store.
//! - [`heartbeat`] -- periodic keep-alive to viewers.
//! - [`config`] -- YAML configuration with defaults and validation.
//! - [`error`] -- [`HubError`].
//!
//! [`Hub`]: hub::Hub
//! [`HubHandle`]: hub::HubHandle
//! [`HubError`]: error::HubError

pub mod config;
pub mod error;
pub mod heartbeat;
pub mod hub;
pub mod listener;
pub mod model;
pub mod reconciler;
