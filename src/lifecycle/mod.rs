//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! ListenSession::start
//!     → Shutdown::spawn per worker (tracked, cancellable)
//!
//! ListenSession::stop / ConfigClient::close
//!     → Shutdown::trigger (cancel token fires)
//!     → Shutdown::wait (joins exactly the spawned workers)
//! ```
//!
//! # Design Decisions
//! - Workers observe cancellation in every blocking point via `select!`
//! - Wait joins tasks instead of polling a counter

pub mod shutdown;

pub use shutdown::Shutdown;
