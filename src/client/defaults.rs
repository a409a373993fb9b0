//! Default subscription keys.
//!
//! Sources, first match wins:
//! 1. the values given by the caller
//! 2. `CONFIG_SYNC_APP_GROUP_NAME` / `CONFIG_SYNC_CONFIG_NAME`
//! 3. the backend registration file

use std::path::Path;

use crate::connection::Registration;
use crate::error::{SyncError, SyncResult};
use crate::store::SubscriptionKey;

pub const ENV_APP_GROUP_NAME: &str = "CONFIG_SYNC_APP_GROUP_NAME";
/// May hold a comma-separated list of config names.
pub const ENV_CONFIG_NAME: &str = "CONFIG_SYNC_CONFIG_NAME";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultKeys {
    pub group: Option<String>,
    pub names: Vec<String>,
}

impl DefaultKeys {
    /// Environment first, registration file for whatever is still missing.
    pub fn discover(registration_path: &Path) -> Self {
        let mut defaults = Self::from_env();
        if defaults.group.is_some() && !defaults.names.is_empty() {
            return defaults;
        }
        if let Ok(registration) = Registration::read(registration_path) {
            defaults.fill_from(&registration);
        }
        defaults
    }

    pub fn from_env() -> Self {
        let group = std::env::var(ENV_APP_GROUP_NAME)
            .ok()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty());
        let names = std::env::var(ENV_CONFIG_NAME)
            .map(|raw| split_names(&raw))
            .unwrap_or_default();
        Self { group, names }
    }

    pub fn fill_from(&mut self, registration: &Registration) {
        if self.group.is_none() {
            self.group = registration.app_group_name().map(str::to_string);
        }
        if self.names.is_empty() {
            if let Some(group) = &registration.app_group_config {
                self.names = group
                    .configs
                    .iter()
                    .map(|c| c.config_name.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .collect();
            }
        }
    }

    pub fn first_name(&self) -> Option<&str> {
        self.names.first().map(String::as_str)
    }
}

/// Split a comma-separated list of config names, dropping blanks.
pub fn split_names(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

impl SubscriptionKey {
    /// Fill an empty group or name from `defaults`.
    pub fn resolve(group: &str, name: &str, defaults: &DefaultKeys) -> SyncResult<Self> {
        let group = match group.trim() {
            "" => defaults.group.clone().ok_or_else(|| {
                SyncError::InvalidKey(format!(
                    "group is empty and {ENV_APP_GROUP_NAME} is not set"
                ))
            })?,
            given => given.to_string(),
        };
        let name = match name.trim() {
            "" => defaults.first_name().map(str::to_string).ok_or_else(|| {
                SyncError::InvalidKey(format!("config name is empty and {ENV_CONFIG_NAME} is not set"))
            })?,
            given => given.to_string(),
        };
        Ok(SubscriptionKey::new(group, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> DefaultKeys {
        DefaultKeys {
            group: Some("payments".into()),
            names: vec!["main".into(), "extra".into()],
        }
    }

    #[test]
    fn test_split_names() {
        assert_eq!(split_names(" a, b ,,c "), vec!["a", "b", "c"]);
        assert!(split_names("  ").is_empty());
    }

    #[test]
    fn test_resolve_prefers_explicit() {
        let key = SubscriptionKey::resolve("g", "n", &defaults()).unwrap();
        assert_eq!(key, SubscriptionKey::new("g", "n"));
    }

    #[test]
    fn test_resolve_falls_back() {
        let key = SubscriptionKey::resolve("", " ", &defaults()).unwrap();
        assert_eq!(key, SubscriptionKey::new("payments", "main"));
    }

    #[test]
    fn test_resolve_without_defaults() {
        let err = SubscriptionKey::resolve("", "n", &DefaultKeys::default()).unwrap_err();
        assert!(matches!(err, SyncError::InvalidKey(_)));
        let err = SubscriptionKey::resolve("g", "", &DefaultKeys::default()).unwrap_err();
        assert!(err.to_string().contains(ENV_CONFIG_NAME));
    }

    #[test]
    fn test_fill_from_registration() {
        let registration: Registration = serde_json::from_str(
            r#"{"token":"t","appGroupConfig":{"appGroupName":"grp","configs":[{"configName":"a"},{"configName":"b"}]}}"#,
        )
        .unwrap();
        let mut keys = DefaultKeys::default();
        keys.fill_from(&registration);
        assert_eq!(keys.group.as_deref(), Some("grp"));
        assert_eq!(keys.names, vec!["a", "b"]);
    }
}
