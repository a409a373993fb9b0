//! Local write-through cache of config records.
//!
//! # Data Flow
//! ```text
//! Config Store update
//!     → file.rs write_through (raw record + key/value view, JSON)
//!
//! One-shot fetch fails with Internal / Unavailable
//!     → file.rs read_fallback (last record written for the key)
//! ```
//!
//! # Design Decisions
//! - The cache is an optimization: write failures are logged, never returned
//! - File names derive only from (group, name) so restarts find the same files
//! - A NotFound from the server overwrites the cache with an empty record

pub mod file;

pub use file::{CacheError, FileCache};
