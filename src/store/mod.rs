//! Per-key authoritative state.
//!
//! # Data Flow
//! ```text
//! delta (listen-recv, put-recv, one-shot fetch)
//!     → store.rs apply (write lock held)
//!         → diff::reconcile  → change events
//!         → record replaced
//!         → diff::env::mirror per event (when enabled)
//!         → cache write-through
//!     → events returned, callback invoked after the lock is released
//! ```
//!
//! # Design Decisions
//! - One lock per key, so unrelated keys never contend
//! - A failed reconcile leaves the record untouched

pub mod record;
#[allow(clippy::module_inception)]
pub mod store;

pub use record::{
    ChangeEvent, Config, ConfigRecord, KeyValueConfig, Section, ServiceAddress, ServiceMap,
    SubscriptionId, SubscriptionKey,
};
pub use store::{ApplyOptions, ConfigStore};
