//! Frames exchanged with the config service.

use serde::{Deserialize, Serialize};

use crate::flatten::Format;
use crate::store::record::{ConfigRecord, SubscriptionKey};

/// Result string the server uses for a successful unary call.
pub const RESULT_SUCCESS: &str = "success";

/// Payload of a write-back stream heartbeat.
pub const HEARTBEAT_PAYLOAD: &str = "\n";

/// Versions the client currently holds for one key. Sent by one-shot fetches
/// and as the subscribe/heartbeat frame of the listen stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigVersion {
    pub version: String,
    pub group: String,
    pub name: String,
    pub public_version: String,
}

impl ConfigVersion {
    pub fn for_record(key: &SubscriptionKey, record: &ConfigRecord) -> Self {
        Self {
            version: record.version.clone(),
            group: key.group.clone(),
            name: key.name.clone(),
            public_version: record.public_version.clone(),
        }
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.group.clone(), self.name.clone())
    }
}

/// Publish a new private body for a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PublishConfigRequest {
    pub group: String,
    pub name: String,
    pub body: String,
    pub tag_name: String,
    #[serde(with = "crate::flatten::format_field")]
    pub format: Option<Format>,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfigResponse {
    pub result: String,
}

impl PublishConfigResponse {
    pub fn is_success(&self) -> bool {
        self.result == RESULT_SUCCESS
    }
}

/// Registration (empty heartbeat) or heartbeat frame of the write-back stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PutConfigRequest {
    pub group: String,
    pub name: String,
    pub heartbeat: String,
}

impl PutConfigRequest {
    pub fn registration(key: &SubscriptionKey) -> Self {
        Self {
            group: key.group.clone(),
            name: key.name.clone(),
            heartbeat: String::new(),
        }
    }

    pub fn heartbeat(key: &SubscriptionKey) -> Self {
        Self {
            heartbeat: HEARTBEAT_PAYLOAD.to_string(),
            ..Self::registration(key)
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        !self.heartbeat.is_empty()
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.group.clone(), self.name.clone())
    }
}

/// Server message id that must be acknowledged via `delete_message`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfigMessage {
    pub key: String,
    pub value: String,
}

/// Update notification pushed on the write-back stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PutConfigResponse {
    pub message: UpdateConfigMessage,
    pub config: ConfigRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteMessageResponse {
    pub result: String,
}

impl DeleteMessageResponse {
    pub fn is_success(&self) -> bool {
        self.result == RESULT_SUCCESS
    }
}
