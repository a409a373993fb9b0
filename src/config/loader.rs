//! Configuration loading from disk and from the process environment.

use std::fs;
use std::path::Path;

use crate::config::schema::ClientConfig;
use crate::config::validation::{strip_scheme, validate_config, ValidationError};

/// Config service address.
pub const ENV_SERVER_ADDR: &str = "CONFIG_SYNC_SERVER_ADDR";
/// Cache directory.
pub const ENV_CACHE_PATH: &str = "CONFIG_SYNC_CACHE_PATH";
/// `true`/`false`: mirror changed keys into the environment.
pub const ENV_MIRROR_ENV: &str = "CONFIG_SYNC_MIRROR_ENV";
/// Listen heartbeat interval in whole seconds.
pub const ENV_LISTEN_INTERVAL: &str = "CONFIG_SYNC_LISTEN_INTERVAL";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
///
/// An empty `server.address` is filled from `CONFIG_SYNC_SERVER_ADDR`.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: ClientConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    if config.server.address.is_empty() {
        if let Some(address) = env_string(ENV_SERVER_ADDR) {
            config.server.address = address;
        }
    }

    finalize(config)
}

impl ClientConfig {
    /// Defaults overridden by `CONFIG_SYNC_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = ClientConfig::default();
        config.apply_env_overrides();
        finalize(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Some(address) = env_string(ENV_SERVER_ADDR) {
            self.server.address = address;
        }
        if let Some(path) = env_string(ENV_CACHE_PATH) {
            self.cache.path = path;
        }
        match env_string(ENV_MIRROR_ENV).map(|v| v.parse::<bool>()) {
            Some(Ok(mirror)) => self.environment.mirror_on_change = mirror,
            Some(Err(_)) => tracing::warn!(var = ENV_MIRROR_ENV, "Ignoring non-boolean value"),
            None => {}
        }
        match env_string(ENV_LISTEN_INTERVAL).map(|v| interval_ms_from_secs(&v)) {
            Some(Some(ms)) => self.listen.interval_ms = ms,
            Some(None) => tracing::warn!(var = ENV_LISTEN_INTERVAL, "Ignoring invalid interval"),
            None => {}
        }
    }
}

/// Whole seconds to milliseconds. Zero, unparsable and overflowing values are rejected.
fn interval_ms_from_secs(value: &str) -> Option<u64> {
    value
        .parse::<u64>()
        .ok()
        .filter(|secs| *secs > 0)
        .and_then(|secs| secs.checked_mul(1000))
}

/// Strip the address scheme, then validate.
pub(crate) fn finalize(mut config: ClientConfig) -> Result<ClientConfig, ConfigError> {
    config.server.address = strip_scheme(config.server.address.trim()).to_string();
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_strips_scheme() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\naddress = \"http://config.internal:9000\"\n\n[cache]\npath = \"/tmp/cs\""
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.address, "config.internal:9000");
        assert_eq!(config.cache.path, "/tmp/cs");
    }

    #[test]
    fn test_load_reports_validation() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\naddress = \"nohost\"\n[listen]\nheartbeat_ms = 0").unwrap();

        match load_config(file.path()) {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_load_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\naddress = 1").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_listen_interval_from_secs() {
        assert_eq!(interval_ms_from_secs("15"), Some(15_000));
        assert_eq!(interval_ms_from_secs("0"), None);
        assert_eq!(interval_ms_from_secs("soon"), None);
        assert_eq!(interval_ms_from_secs(&u64::MAX.to_string()), None);
        assert_eq!(interval_ms_from_secs(&(u64::MAX / 1000 + 1).to_string()), None);
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/nonexistent/config-sync.toml")).unwrap_err();
        assert!(err.to_string().starts_with("IO error"));
    }
}
