//! Configuration validation.
//!
//! Pure functions: `ClientConfig → Result<(), Vec<ValidationError>>`.

use thiserror::Error;
use url::Host;

use crate::config::schema::ClientConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("config service address is empty")]
    MissingServerAddress,

    #[error("config service address '{address}' is invalid: {reason}")]
    InvalidServerAddress { address: String, reason: String },

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

/// Strip an `http://` / `https://` prefix from a server address.
pub fn strip_scheme(address: &str) -> &str {
    address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("https://"))
        .unwrap_or(address)
}

/// Check that `address` is `host:port` with a valid host and a port in 1..=65535.
pub fn check_address(address: &str) -> Result<(), ValidationError> {
    let invalid = |reason: &str| ValidationError::InvalidServerAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("host is empty"));
    }
    Host::parse(host).map_err(|e| invalid(&e.to_string()))?;
    match port.parse::<u16>() {
        Ok(0) | Err(_) => Err(invalid("port must be in 1..=65535")),
        Ok(_) => Ok(()),
    }
}

/// Validate a config whose address has already been normalized.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.address.is_empty() {
        errors.push(ValidationError::MissingServerAddress);
    } else if let Err(e) = check_address(&config.server.address) {
        errors.push(e);
    }

    let non_zero = [
        ("listen.interval_ms", config.listen.interval_ms),
        ("listen.heartbeat_ms", config.listen.heartbeat_ms),
        ("listen.recv_retry_ms", config.listen.recv_retry_ms),
        ("reconnect.base_delay_ms", config.reconnect.base_delay_ms),
        ("credentials.max_attempts", u64::from(config.credentials.max_attempts)),
    ];
    for (field, value) in non_zero {
        if value == 0 {
            errors.push(ValidationError::ZeroValue(field));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_address(address: &str) -> ClientConfig {
        let mut config = ClientConfig::default();
        config.server.address = address.to_string();
        config
    }

    #[test]
    fn test_valid_addresses() {
        assert!(validate_config(&with_address("127.0.0.1:9000")).is_ok());
        assert!(validate_config(&with_address("config.svc.local:443")).is_ok());
        assert!(validate_config(&with_address("[::1]:9000")).is_ok());
    }

    #[test]
    fn test_strip_scheme() {
        assert_eq!(strip_scheme("http://a:1"), "a:1");
        assert_eq!(strip_scheme("https://a:1"), "a:1");
        assert_eq!(strip_scheme("a:1"), "a:1");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in ["nohost", ":9000", "host:0", "host:70000", "host:abc"] {
            let errors = validate_config(&with_address(bad)).unwrap_err();
            assert!(
                matches!(errors[0], ValidationError::InvalidServerAddress { .. }),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ClientConfig::default();
        config.listen.interval_ms = 0;
        config.credentials.max_attempts = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::MissingServerAddress));
        assert!(errors.contains(&ValidationError::ZeroValue("listen.interval_ms")));
    }
}
