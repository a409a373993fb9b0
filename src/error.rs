//! Failure taxonomy surfaced to callers of the client.

use thiserror::Error;

use crate::cache::CacheError;
use crate::config::ConfigError;
use crate::flatten::DecodeError;
use crate::store::record::SubscriptionKey;
use crate::transport::{Code, Status};

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// No connection could be used for the call.
    #[error("config service unavailable: {0}")]
    TransportUnavailable(String),

    #[error("config {key} not found: {message}")]
    ResourceNotFound { key: String, message: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("config service internal error: {0}")]
    ServerInternal(String),

    #[error("failed to decode config: {0}")]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    /// Group or name missing and no default could be resolved.
    #[error("invalid subscription key: {0}")]
    InvalidKey(String),

    /// Both the server and the local cache failed.
    #[error("config {key} unreachable: server failed ({server}) and cache failed ({source})")]
    Unreachable {
        key: SubscriptionKey,
        server: String,
        #[source]
        source: CacheError,
    },

    #[error("publish rejected by server: {0}")]
    PublishRejected(String),

    #[error("rpc failed: {0}")]
    Rpc(Status),

    #[error("invalid client configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("client is closed")]
    Closed,
}

impl From<Status> for SyncError {
    fn from(status: Status) -> Self {
        let message = status.message().to_string();
        match status.code() {
            Code::Unavailable => SyncError::TransportUnavailable(message),
            Code::NotFound => SyncError::ResourceNotFound {
                key: String::new(),
                message,
            },
            Code::PermissionDenied => SyncError::PermissionDenied(message),
            Code::Internal => SyncError::ServerInternal(message),
            _ => SyncError::Rpc(status),
        }
    }
}

impl SyncError {
    pub(crate) fn not_found(key: &SubscriptionKey, status: &Status) -> Self {
        SyncError::ResourceNotFound {
            key: key.to_string(),
            message: status.message().to_string(),
        }
    }
}
