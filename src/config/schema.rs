//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for a config-sync client.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ClientConfig {
    /// Where the config service lives.
    pub server: ServerConfig,

    /// Local write-through cache.
    pub cache: CacheConfig,

    /// Stream heartbeat and retry timing.
    pub listen: ListenConfig,

    /// Process environment mirroring.
    pub environment: EnvironmentConfig,

    /// Reconnect backoff.
    pub reconnect: ReconnectConfig,

    /// Backend registration file used for call credentials and default keys.
    pub credentials: CredentialsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ClientConfig {
    /// Directory holding cache files. Defaults to `cache/` next to the executable.
    pub fn cache_dir(&self) -> PathBuf {
        if !self.cache.path.is_empty() {
            return PathBuf::from(&self.cache.path);
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("cache")
    }
}

/// Config service endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// `host:port`; an `http://` or `https://` prefix is stripped.
    pub address: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Cache directory. Empty means `cache/` next to the executable.
    pub path: String,
}

/// Timing of the four stream workers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Listen-stream heartbeat (version resend) interval in milliseconds.
    pub interval_ms: u64,

    /// Write-back stream heartbeat interval in milliseconds.
    pub heartbeat_ms: u64,

    /// Pause before retrying a receive after a transient error, in milliseconds.
    pub recv_retry_ms: u64,
}

impl ListenConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn recv_retry(&self) -> Duration {
        Duration::from_millis(self.recv_retry_ms)
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            heartbeat_ms: 40_000,
            recv_retry_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Set/clear environment variables for every changed key.
    pub mirror_on_change: bool,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            mirror_on_change: true,
        }
    }
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// First backoff interval in milliseconds; doubles per failed dial.
    pub base_delay_ms: u64,

    /// Upper bound of the doubled interval in milliseconds.
    pub max_delay_ms: u64,

    /// Random extra delay added to each sleep, `[0, max_jitter_ms)`.
    pub max_jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 300_000,
            max_jitter_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// JSON file written by the sidecar when the backend registers.
    pub registration_path: String,

    /// Read attempts before giving up on one call's credentials.
    pub max_attempts: u32,

    /// Pause between read attempts in milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            registration_path: "/mosn/register".to_string(),
            max_attempts: 10,
            retry_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}
