//! Subscription façade.
//!
//! # Data Flow
//! ```text
//! caller
//!     → defaults.rs (fill empty group / name)
//!     → facade.rs ConfigClient
//!         one-shot reads → transport GetConfig → ConfigStore::apply → cache
//!                          (Internal / Unavailable → cache fallback)
//!         publish        → transport PublishConfig (one retry across reconnect)
//!         listen         → supervisor::ListenSession
//! ```

pub mod defaults;
pub mod facade;

pub use defaults::DefaultKeys;
pub use facade::{ConfigClient, ListenHandle, ListenParams};
pub use crate::supervisor::OnChange;
