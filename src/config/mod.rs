//! Client configuration subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) or process environment
//!     → loader.rs (parse, fill the server address from the environment)
//!     → validation.rs (semantic checks, address normalization)
//!     → ClientConfig (validated, immutable)
//!     → shared via Arc by the connection manager and stream workers
//! ```
//!
//! # Design Decisions
//! - All fields have defaults so a config can be as small as the server address
//! - Validation reports every problem at once, not just the first
//! - Unparsable environment overrides keep the default instead of failing

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CacheConfig, ClientConfig, CredentialsConfig, EnvironmentConfig, ListenConfig,
    ObservabilityConfig, ReconnectConfig, ServerConfig,
};
