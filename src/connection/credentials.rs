//! Per-call credentials read from the backend registration file.
//!
//! The sidecar writes the file once the backend has registered, so it may not
//! exist yet when the first calls go out. Reads are retried a bounded number
//! of times; after that the call proceeds without identity and the server
//! decides what to do with it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::CredentialsConfig;
use crate::transport::{CallCredentials, CallMetadata};

pub const METADATA_BACKEND_NAME: &str = "backendName";
pub const METADATA_TOKEN: &str = "token";

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("registration file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registration file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("registration file {0} has no backend token")]
    MissingToken(PathBuf),
}

/// Contents of the registration file. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Registration {
    pub token: String,
    pub backend_name: String,
    pub app_group_config: Option<AppGroupRegistration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppGroupRegistration {
    pub app_group_name: String,
    pub configs: Vec<ConfigRegistration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigRegistration {
    pub config_name: String,
    pub write_able: bool,
}

impl Registration {
    pub fn read(path: &Path) -> Result<Self, RegistrationError> {
        let content = std::fs::read_to_string(path).map_err(|source| RegistrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| RegistrationError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Group name assigned to this backend, if any.
    pub fn app_group_name(&self) -> Option<&str> {
        self.app_group_config
            .as_ref()
            .map(|group| group.app_group_name.as_str())
            .filter(|name| !name.is_empty())
    }

    /// First config name assigned to this backend, if any.
    pub fn first_config_name(&self) -> Option<&str> {
        self.app_group_config
            .as_ref()
            .and_then(|group| group.configs.first())
            .map(|config| config.config_name.as_str())
            .filter(|name| !name.is_empty())
    }
}

/// Attaches `backendName` and `token` to every call.
#[derive(Debug, Clone)]
pub struct CredentialProvider {
    path: PathBuf,
    max_attempts: u32,
    retry_delay: Duration,
}

impl CredentialProvider {
    pub fn new(path: impl Into<PathBuf>, max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            path: path.into(),
            max_attempts: max_attempts.max(1),
            retry_delay,
        }
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::new(
            &config.registration_path,
            config.max_attempts,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    /// Read the registration file until it yields a token or attempts run out.
    pub async fn registration(&self) -> Result<Registration, RegistrationError> {
        let mut attempt = 1;
        loop {
            let result = Registration::read(&self.path).and_then(|registration| {
                if registration.token.is_empty() {
                    Err(RegistrationError::MissingToken(self.path.clone()))
                } else {
                    Ok(registration)
                }
            });
            match result {
                Ok(registration) => return Ok(registration),
                Err(e) if attempt >= self.max_attempts => return Err(e),
                Err(e) => {
                    debug!(attempt, error = %e, "Registration not readable yet");
                    attempt += 1;
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl CallCredentials for CredentialProvider {
    async fn metadata(&self) -> CallMetadata {
        let mut metadata = CallMetadata::new();
        match self.registration().await {
            Ok(registration) => {
                metadata.insert(METADATA_BACKEND_NAME.to_string(), registration.backend_name);
                metadata.insert(METADATA_TOKEN.to_string(), registration.token);
            }
            Err(e) => {
                warn!(error = %e, "Sending call without backend credentials");
            }
        }
        metadata
    }
}
