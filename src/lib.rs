//! Client-side configuration synchronization engine.
//!
//! Keeps a local copy of remotely managed config objects in sync with a
//! central config service: one-shot fetches with cache fallback, streaming
//! subscriptions with automatic reconnection, and per-key change events.

pub mod cache;
pub mod client;
pub mod config;
pub mod connection;
pub mod diff;
pub mod error;
pub mod flatten;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod store;
pub mod supervisor;
pub mod transport;

pub use client::{ConfigClient, ListenHandle, ListenParams, OnChange};
pub use config::ClientConfig;
pub use error::{SyncError, SyncResult};
pub use store::{ChangeEvent, Config, ConfigRecord, KeyValueConfig, Section, SubscriptionKey};
