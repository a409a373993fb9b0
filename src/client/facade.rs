//! `ConfigClient`: the public entry point of the crate.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::FileCache;
use crate::client::defaults::DefaultKeys;
use crate::config::loader::finalize;
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, CredentialProvider, ReconnectReport};
use crate::error::{SyncError, SyncResult};
use crate::observability::metrics;
use crate::store::{
    ApplyOptions, Config, ConfigRecord, ConfigStore, KeyValueConfig, ServiceAddress,
    SubscriptionId, SubscriptionKey,
};
use crate::supervisor::{ListenSession, OnChange, SessionProbe, WorkerContext};
use crate::transport::{CallCredentials, Code, ConfigTransport, PublishConfigRequest, Status};

/// What to listen to. Empty group or name fall back to the defaults.
#[derive(Clone, Default)]
pub struct ListenParams {
    pub group: String,
    pub name: String,
    pub on_change: Option<OnChange>,
}

impl ListenParams {
    pub fn new(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            on_change: None,
        }
    }

    pub fn on_change<F>(mut self, callback: F) -> Self
    where
        F: Fn(&crate::store::ChangeEvent) + Send + Sync + 'static,
    {
        self.on_change = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for ListenParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenParams")
            .field("group", &self.group)
            .field("name", &self.name)
            .field("on_change", &self.on_change.is_some())
            .finish()
    }
}

/// Returned by `listen_config`; identifies the session.
#[derive(Debug, Clone)]
pub struct ListenHandle {
    id: SubscriptionId,
    probe: SessionProbe,
}

impl ListenHandle {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn key(&self) -> &SubscriptionKey {
        self.id.key()
    }

    /// Which of the session's workers are still running.
    pub fn probe(&self) -> &SessionProbe {
        &self.probe
    }
}

/// Keeps one Config Store per key in sync with the config service.
pub struct ConfigClient {
    config: ClientConfig,
    manager: Arc<ConnectionManager>,
    cache: Arc<FileCache>,
    stores: DashMap<SubscriptionKey, Arc<ConfigStore>>,
    sessions: Mutex<HashMap<SubscriptionId, ListenSession>>,
    shutdown: CancellationToken,
}

impl ConfigClient {
    /// Connect with credentials read from the configured registration file.
    pub async fn connect(
        config: ClientConfig,
        transport: Arc<dyn ConfigTransport>,
    ) -> SyncResult<Self> {
        let credentials = Arc::new(CredentialProvider::from_config(&config.credentials));
        Self::connect_with(config, transport, credentials).await
    }

    /// Connect with explicit credentials. The address is normalized and the
    /// config validated as `load_config` does.
    pub async fn connect_with(
        config: ClientConfig,
        transport: Arc<dyn ConfigTransport>,
        credentials: Arc<dyn CallCredentials>,
    ) -> SyncResult<Self> {
        let config = finalize(config)?;

        let cache = Arc::new(FileCache::new(config.cache_dir()));
        let manager = ConnectionManager::connect(
            config.server.address.clone(),
            transport,
            credentials,
            config.reconnect.clone(),
        )
        .await;
        info!(
            endpoint = %config.server.address,
            cache = %cache.dir().display(),
            connected = manager.is_connected(),
            "Config client ready"
        );

        Ok(Self {
            config,
            manager,
            cache,
            stores: DashMap::new(),
            sessions: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    pub fn is_connected(&self) -> bool {
        self.manager.is_connected()
    }

    pub fn last_reconnect(&self) -> Option<ReconnectReport> {
        self.manager.last_reconnect()
    }

    /// Defaults from the environment and the registration file.
    pub fn default_keys(&self) -> DefaultKeys {
        DefaultKeys::discover(&PathBuf::from(&self.config.credentials.registration_path))
    }

    fn resolve(&self, group: &str, name: &str) -> SyncResult<SubscriptionKey> {
        if !group.trim().is_empty() && !name.trim().is_empty() {
            return Ok(SubscriptionKey::new(group.trim(), name.trim()));
        }
        SubscriptionKey::resolve(group, name, &self.default_keys())
    }

    fn store(&self, key: &SubscriptionKey) -> Arc<ConfigStore> {
        self.stores
            .entry(key.clone())
            .or_insert_with(|| Arc::new(ConfigStore::new(key.clone())))
            .clone()
    }

    fn ensure_open(&self) -> SyncResult<()> {
        if self.manager.is_closed() {
            Err(SyncError::Closed)
        } else {
            Ok(())
        }
    }

    /// Fetch a key once. Falls back to the cache on `Internal` / `Unavailable`.
    pub async fn get_config(&self, group: &str, name: &str) -> SyncResult<Config> {
        let key = self.resolve(group, name)?;
        let record = self.fetch(&key).await?;
        Ok(Config::try_from(&record)?)
    }

    /// `get_config` with every section flattened to dotted keys.
    pub async fn get_key_value_config(&self, group: &str, name: &str) -> SyncResult<KeyValueConfig> {
        let key = self.resolve(group, name)?;
        let record = self.fetch(&key).await?;
        Ok(KeyValueConfig::try_from(&record)?)
    }

    pub async fn get_public_config(&self, group: &str, name: &str) -> SyncResult<String> {
        let key = self.resolve(group, name)?;
        Ok(self.fetch(&key).await?.public)
    }

    pub async fn get_private_config(&self, group: &str, name: &str) -> SyncResult<String> {
        let key = self.resolve(group, name)?;
        Ok(self.fetch(&key).await?.private)
    }

    /// Instances of one service listed in the key's services section.
    pub async fn get_service_address(
        &self,
        group: &str,
        name: &str,
        service: &str,
    ) -> SyncResult<HashMap<String, ServiceAddress>> {
        let key = self.resolve(group, name)?;
        let record = self.fetch(&key).await?;
        let mut services = record.service_map()?;
        services
            .remove(service)
            .ok_or_else(|| SyncError::ResourceNotFound {
                key: format!("{key}/{service}"),
                message: "service is not listed in the services section".to_string(),
            })
    }

    /// Key/value view as last written to the cache, without contacting the server.
    pub fn cached_key_value_config(&self, group: &str, name: &str) -> SyncResult<KeyValueConfig> {
        let key = self.resolve(group, name)?;
        Ok(self.cache.read_key_value(&key)?)
    }

    async fn fetch(&self, key: &SubscriptionKey) -> SyncResult<ConfigRecord> {
        self.ensure_open()?;
        let store = self.store(key);
        let mirror_env = self.config.environment.mirror_on_change;

        let status = match self.manager.current() {
            None => Status::unavailable("not connected to config service"),
            Some((generation, conn)) => match conn.get_config(store.versions()).await {
                Ok(record) => {
                    if !record.is_empty() {
                        let options = ApplyOptions {
                            cache: Some(self.cache.as_ref()),
                            mirror_env,
                        };
                        store.apply(&record, &options)?;
                        metrics::record_delta_applied("fetch");
                    }
                    return Ok(store.snapshot());
                }
                Err(status) => {
                    if status.code() == Code::Unavailable {
                        self.manager.start_redial(generation);
                    }
                    status
                }
            },
        };

        match status.code() {
            Code::NotFound => {
                debug!(group = %key.group, config = %key.name, "Config does not exist, clearing cache");
                self.cache.write_through(key, &ConfigRecord::default());
                Err(SyncError::not_found(key, &status))
            }
            Code::Internal | Code::Unavailable => {
                warn!(group = %key.group, config = %key.name, error = %status, "Fetch failed, reading cache");
                metrics::record_cache_fallback();
                let cached = self.cache.read_fallback(key).map_err(|source| SyncError::Unreachable {
                    key: key.clone(),
                    server: status.to_string(),
                    source,
                })?;
                if !cached.is_empty() {
                    let options = ApplyOptions {
                        cache: None,
                        mirror_env,
                    };
                    store.apply(&cached, &options)?;
                }
                Ok(store.snapshot())
            }
            _ => Err(status.into()),
        }
    }

    /// Publish a new private body. Retries once across a reconnect on `Unavailable`.
    pub async fn publish_config(&self, mut request: PublishConfigRequest) -> SyncResult<()> {
        self.ensure_open()?;
        let key = self.resolve(&request.group, &request.name)?;
        request.group = key.group.clone();
        request.name = key.name.clone();

        let first = match self.manager.current() {
            Some((generation, conn)) => (generation, conn.publish_config(request.clone()).await),
            None => (
                self.manager.generation(),
                Err(Status::unavailable("not connected to config service")),
            ),
        };
        let response = match first {
            (generation, Err(status)) if status.code() == Code::Unavailable => {
                info!(group = %key.group, config = %key.name, "Publish hit an unavailable link, reconnecting");
                if !self.manager.reconnect(generation).await {
                    return Err(SyncError::Closed);
                }
                let (_, conn) = self
                    .manager
                    .current()
                    .ok_or_else(|| SyncError::TransportUnavailable("reconnect lost the link".into()))?;
                conn.publish_config(request).await?
            }
            (_, result) => result?,
        };

        if !response.is_success() {
            return Err(SyncError::PublishRejected(response.result));
        }
        debug!(group = %key.group, config = %key.name, "Published config");
        Ok(())
    }

    /// Start the four workers for a key. Only key validation can fail.
    pub fn listen_config(&self, params: ListenParams) -> SyncResult<ListenHandle> {
        self.ensure_open()?;
        let key = self.resolve(&params.group, &params.name)?;
        let id = SubscriptionId::new(key.clone());

        let ctx = WorkerContext {
            id: id.clone(),
            store: self.store(&key),
            manager: Arc::clone(&self.manager),
            cache: Arc::clone(&self.cache),
            listen: self.config.listen.clone(),
            mirror_env: self.config.environment.mirror_on_change,
            on_change: params.on_change,
        };
        let session = ListenSession::start(ctx, &self.shutdown);
        let handle = ListenHandle {
            id: id.clone(),
            probe: session.probe(),
        };
        self.sessions.lock().insert(id, session);
        Ok(handle)
    }

    /// Listen to every default config name of the default group.
    pub fn listen_defaults(&self, on_change: Option<OnChange>) -> SyncResult<Vec<ListenHandle>> {
        let defaults = self.default_keys();
        let group = defaults.group.clone().ok_or_else(|| {
            SyncError::InvalidKey("no default group configured".to_string())
        })?;
        if defaults.names.is_empty() {
            return Err(SyncError::InvalidKey("no default config names configured".to_string()));
        }
        defaults
            .names
            .iter()
            .map(|name| {
                self.listen_config(ListenParams {
                    group: group.clone(),
                    name: name.clone(),
                    on_change: on_change.clone(),
                })
            })
            .collect()
    }

    /// Stop one session and wait for its workers.
    pub async fn stop_listening(&self, handle: &ListenHandle) {
        let session = self.sessions.lock().remove(&handle.id);
        if let Some(session) = session {
            session.stop().await;
        }
    }

    /// Stop every session, then close the transport. Idempotent.
    pub async fn close(&self) {
        if self.manager.is_closed() {
            return;
        }
        self.shutdown.cancel();
        let sessions: Vec<ListenSession> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            session.stop().await;
        }
        self.manager.close().await;
        info!(sessions = sessions.len(), "Config client closed");
    }
}
