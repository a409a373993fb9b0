//! Config record, subscription keys and derived views.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::flatten::{self, DecodeError, FlatMap, Format};

/// (group, name) pair identifying one logical config object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    pub group: String,
    pub name: String,
}

impl SubscriptionKey {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// Stem shared by every cache file of this key.
    pub fn file_stem(&self) -> String {
        format!("{}_{}", self.group, self.name)
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.group, self.name)
    }
}

/// Identifier of one Listen session: the key plus a random suffix, so two
/// sessions on the same key never share stream handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId {
    key: SubscriptionKey,
    suffix: Uuid,
}

impl SubscriptionId {
    pub fn new(key: SubscriptionKey) -> Self {
        Self {
            key,
            suffix: Uuid::new_v4(),
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.key, self.suffix.simple())
    }
}

/// One of the independently versioned partitions of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Public,
    Private,
    Services,
}

impl Section {
    pub fn as_str(&self) -> &'static str {
        match self {
            Section::Public => "public",
            Section::Private => "private",
            Section::Services => "services",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A changed or deleted key. An empty `value` is a tombstone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub section: Section,
    pub key: String,
    pub value: String,
}

impl ChangeEvent {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_empty()
    }
}

/// The synchronized config object for one subscription key.
///
/// The JSON field names are the ones the server and the cache files use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigRecord {
    pub private: String,
    pub version: String,
    #[serde(with = "crate::flatten::format_field")]
    pub format: Option<Format>,
    pub public: String,
    pub public_version: String,
    #[serde(with = "crate::flatten::format_field")]
    pub public_format: Option<Format>,
    /// JSON map of service name to endpoints. Versioned by `public_version`.
    pub services: String,
}

impl ConfigRecord {
    pub fn is_empty(&self) -> bool {
        *self == ConfigRecord::default()
    }

    pub fn flat_private(&self) -> Result<FlatMap, DecodeError> {
        flatten::parse_flat(&self.private, self.format)
            .map_err(|e| DecodeError::in_section(Section::Private.as_str(), e))
    }

    pub fn flat_public(&self) -> Result<FlatMap, DecodeError> {
        flatten::parse_flat(&self.public, self.public_format)
            .map_err(|e| DecodeError::in_section(Section::Public.as_str(), e))
    }

    pub fn flat_services(&self) -> Result<FlatMap, DecodeError> {
        flatten::parse_flat(&self.services, Some(Format::Json))
            .map_err(|e| DecodeError::in_section(Section::Services.as_str(), e))
    }

    /// Decode the services section into typed endpoint maps.
    pub fn service_map(&self) -> Result<ServiceMap, DecodeError> {
        if self.services.is_empty() {
            return Ok(ServiceMap::new());
        }
        serde_json::from_str(&self.services)
            .map_err(|e| DecodeError::in_section(Section::Services.as_str(), e.into()))
    }
}

/// Endpoints of one deployed service instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceAddress {
    pub internal_address: String,
    pub external_address: String,
    pub svc_address: String,
    pub port: i64,
    pub target_port: i64,
}

/// service name → instance name → address.
pub type ServiceMap = HashMap<String, HashMap<String, ServiceAddress>>;

/// Caller-facing view of a record, with services decoded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub private: String,
    pub version: String,
    #[serde(with = "crate::flatten::format_field")]
    pub format: Option<Format>,
    pub public: String,
    pub public_version: String,
    #[serde(with = "crate::flatten::format_field")]
    pub public_format: Option<Format>,
    pub services: ServiceMap,
}

impl TryFrom<&ConfigRecord> for Config {
    type Error = DecodeError;

    fn try_from(record: &ConfigRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            private: record.private.clone(),
            version: record.version.clone(),
            format: record.format,
            public: record.public.clone(),
            public_version: record.public_version.clone(),
            public_format: record.public_format,
            services: record.service_map()?,
        })
    }
}

/// Flattened projection of all three sections. Always derived, never authoritative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KeyValueConfig {
    pub private: FlatMap,
    pub version: String,
    pub public: FlatMap,
    pub public_version: String,
    pub services: FlatMap,
}

impl TryFrom<&ConfigRecord> for KeyValueConfig {
    type Error = DecodeError;

    fn try_from(record: &ConfigRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            private: record.flat_private()?,
            version: record.version.clone(),
            public: record.flat_public()?,
            public_version: record.public_version.clone(),
            services: record.flat_services()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> ConfigRecord {
        ConfigRecord {
            private: "key1: val1\nfield:\n  key2: val2\n".into(),
            version: "v3".into(),
            format: Some(Format::Yaml),
            public: r#"{"region":"eu"}"#.into(),
            public_version: "p7".into(),
            public_format: Some(Format::Json),
            services: r#"{"billing":{"primary":{"internalAddress":"10.0.0.1","port":80,"targetPort":8080}}}"#.into(),
        }
    }

    #[test]
    fn test_record_json_uses_wire_names() {
        let value = serde_json::to_value(sample()).unwrap();
        assert_eq!(value["publicVersion"], json!("p7"));
        assert_eq!(value["format"], json!("yaml"));

        let empty = serde_json::to_value(ConfigRecord::default()).unwrap();
        assert_eq!(empty["publicFormat"], json!(""));
        let back: ConfigRecord = serde_json::from_value(empty).unwrap();
        assert!(back.is_empty());
    }

    #[test]
    fn test_key_value_view() {
        let kv = KeyValueConfig::try_from(&sample()).unwrap();
        assert_eq!(kv.private.get("field.key2"), Some(&json!("val2")));
        assert_eq!(kv.public.get("region"), Some(&json!("eu")));
        assert_eq!(kv.services.get("billing.primary.port"), Some(&json!(80)));
        assert_eq!(kv.version, "v3");
    }

    #[test]
    fn test_service_map() {
        let config = Config::try_from(&sample()).unwrap();
        let billing = &config.services["billing"];
        assert_eq!(billing["primary"].internal_address, "10.0.0.1");
        assert_eq!(billing["primary"].target_port, 8080);
    }

    #[test]
    fn test_malformed_services_reports_section() {
        let mut record = sample();
        record.services = "{broken".into();
        let err = record.service_map().unwrap_err();
        assert!(err.to_string().starts_with("services section"));
    }

    #[test]
    fn test_subscription_ids_are_distinct() {
        let key = SubscriptionKey::new("shop", "checkout");
        let a = SubscriptionId::new(key.clone());
        let b = SubscriptionId::new(key.clone());
        assert_ne!(a, b);
        assert_eq!(a.key(), &key);
        assert!(a.to_string().starts_with("shop/checkout#"));
        assert_eq!(key.file_stem(), "shop_checkout");
    }
}
