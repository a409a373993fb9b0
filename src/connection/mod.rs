//! Connection management subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigClient::connect
//!     → manager.rs dial (transport + credentials.rs provider)
//!
//! worker sees Unavailable / stream teardown
//!     → manager.rs reconnect(observed generation)
//!         → close link + every stream handle
//!         → redial with backoff until success or close()
//!         → swap link and rebuild handles under the handle lock
//!     → workers continue on handles of the new generation
//! ```
//!
//! # Design Decisions
//! - Only one redial loop runs at a time; other callers wait on its result
//! - Handles carry the generation of the link they were opened on
//! - Missing credentials never fail a dial; the server judges each call

pub mod credentials;
pub mod manager;

pub use credentials::{CredentialProvider, Registration};
pub use manager::{ConnectionManager, ReconnectReport, StreamHandleSet};
