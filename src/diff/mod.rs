//! Diff & notification engine.
//!
//! # Data Flow
//! ```text
//! (current record, incoming delta)
//!     → reconcile.rs (decode both sides, diff per section)
//!     → ChangeEvent stream (section, key, value | tombstone)
//!     → env.rs (optional environment mirroring)
//!     → caller callback
//! ```
//!
//! # Design Decisions
//! - Sections are compared by version: an empty version means "not part of this delta"
//! - Decoding happens before any event is emitted (no partial application)
//! - Values are compared by decoded type, so `"1"` and `1` differ

pub mod env;
pub mod reconcile;

pub use reconcile::{diff_section, reconcile};
