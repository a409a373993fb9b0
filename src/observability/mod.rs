//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields (subscription, role, error)
//!     → metrics.rs counters (reconnects, applied deltas, cache fallbacks)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout) when the binary owns the process
//!     → whatever metrics recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - The library never installs a global subscriber or recorder on its own
//! - Counters are no-ops until a recorder exists

pub mod logging;
pub mod metrics;
