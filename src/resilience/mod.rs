//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Worker or one-shot call fails with a Status:
//!     → classify.rs (Terminal | Retriable | Transient)
//!     → Retriable: connection manager redials with backoff.rs delays
//!     → Transient: short fixed sleep, same handle
//!     → Terminal: the worker exits
//! ```
//!
//! # Design Decisions
//! - One classification function shared by all stream workers
//! - Reconnect never gives up; only client teardown stops it
//! - Jittered backoff keeps a fleet of clients from redialing in lockstep

pub mod backoff;
pub mod classify;

pub use backoff::ReconnectBackoff;
pub use classify::{classify, ErrorClass};
