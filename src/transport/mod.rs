//! Transport abstraction for the config service.
//!
//! The engine talks to the service only through these traits, so the wire
//! stack (gRPC, HTTP/2, in-process) is pluggable:
//! - `ConfigTransport` dials a `ConfigConnection`
//! - a connection serves the unary calls and opens the two duplex streams
//! - `memory` is an in-process implementation with failure injection
//!
//! # Design Decisions
//! - Every failure is a `Status`; classification lives in `resilience`
//! - Streams are shared by a send worker and a receive worker, so both
//!   directions take `&self`
//! - Credentials are asked for on every call, never cached by the transport

pub mod memory;
pub mod messages;
pub mod status;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::store::record::ConfigRecord;

pub use messages::{
    ConfigVersion, DeleteMessageResponse, PublishConfigRequest, PublishConfigResponse,
    PutConfigRequest, PutConfigResponse, UpdateConfigMessage,
};
pub use status::{Code, Status};

/// Per-call metadata attached by the credential provider.
pub type CallMetadata = BTreeMap<String, String>;

/// Supplies caller identity for each RPC.
#[async_trait]
pub trait CallCredentials: Send + Sync {
    async fn metadata(&self) -> CallMetadata;
}

/// Fixed metadata for every call. Useful when identity does not come from a registration file.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub CallMetadata);

#[async_trait]
impl CallCredentials for StaticCredentials {
    async fn metadata(&self) -> CallMetadata {
        self.0.clone()
    }
}

/// Dials connections to the config service.
#[async_trait]
pub trait ConfigTransport: Send + Sync {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: Arc<dyn CallCredentials>,
    ) -> Result<Arc<dyn ConfigConnection>, Status>;
}

/// One live transport channel.
#[async_trait]
pub trait ConfigConnection: Send + Sync {
    async fn get_config(&self, request: ConfigVersion) -> Result<ConfigRecord, Status>;

    async fn publish_config(
        &self,
        request: PublishConfigRequest,
    ) -> Result<PublishConfigResponse, Status>;

    async fn delete_message(
        &self,
        request: UpdateConfigMessage,
    ) -> Result<DeleteMessageResponse, Status>;

    /// Open the listen stream: subscribe/heartbeat frames out, deltas in.
    async fn open_listen(&self) -> Result<ListenStream, Status>;

    /// Open the write-back stream: registration/heartbeat frames out, update notifications in.
    async fn open_put(&self) -> Result<PutStream, Status>;

    /// Close the channel and every stream opened on it.
    async fn close(&self);
}

/// A bidirectional stream shared between one sender and one receiver.
#[async_trait]
pub trait DuplexStream<Out, In>: Send + Sync
where
    Out: Send + 'static,
    In: Send + 'static,
{
    async fn send(&self, frame: Out) -> Result<(), Status>;

    /// `Ok(None)` means the server ended the stream.
    async fn recv(&self) -> Result<Option<In>, Status>;

    async fn close(&self);
}

pub type ListenStream = Arc<dyn DuplexStream<ConfigVersion, ConfigRecord>>;
pub type PutStream = Arc<dyn DuplexStream<PutConfigRequest, PutConfigResponse>>;
