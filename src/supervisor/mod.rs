//! Stream supervisor subsystem.
//!
//! # Data Flow
//! ```text
//! ConfigClient::listen_config
//!     → session.rs ListenSession::start
//!         → listen-send: versions frame now, then every listen interval
//!         → listen-recv: delta → ConfigStore::apply → on_change
//!         → put-send:    registration, then heartbeat every heartbeat interval
//!         → put-recv:    update → acknowledge → ConfigStore::apply → on_change
//!
//! failures → worker.rs recover (classification shared by all four)
//! ```
//!
//! # Design Decisions
//! - Workers never surface errors; terminal exits are visible through `SessionProbe`
//! - Each session has its own handles, so repeated Listen calls never alias

pub mod probe;
pub mod session;
pub mod worker;

use std::sync::Arc;

use crate::store::ChangeEvent;

pub use probe::{Role, SessionProbe};
pub use session::ListenSession;
pub use worker::WorkerContext;

/// Change callback, invoked once per changed or deleted key.
pub type OnChange = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
