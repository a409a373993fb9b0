//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;

use config_sync::flatten::Format;
use config_sync::transport::memory::MemoryConfigServer;
use config_sync::{ChangeEvent, ClientConfig, ConfigClient, ConfigRecord, OnChange, SubscriptionKey};

pub const TOKEN: &str = "it-token";
pub const BACKEND: &str = "it-backend";

/// A client wired to an in-process server, with its cache in a temp dir.
pub struct Harness {
    pub server: MemoryConfigServer,
    pub client: ConfigClient,
    pub dir: TempDir,
}

impl Harness {
    pub async fn start() -> Self {
        Self::start_with(MemoryConfigServer::new(), |_| {}).await
    }

    pub async fn start_with(server: MemoryConfigServer, tweak: impl FnOnce(&mut ClientConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        write_registration(dir.path(), "it-group", &["first", "second"]);
        let mut config = test_config(dir.path());
        tweak(&mut config);
        let client = ConfigClient::connect(config, Arc::new(server.transport()))
            .await
            .unwrap();
        Self { server, client, dir }
    }

    /// A second client sharing this harness's server and cache directory.
    pub async fn restart(&self) -> ConfigClient {
        ConfigClient::connect(test_config(self.dir.path()), Arc::new(self.server.transport()))
            .await
            .unwrap()
    }
}

/// Fast timers, no jitter, no environment mirroring.
pub fn test_config(dir: &Path) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.server.address = "memory.test:7001".to_string();
    config.cache.path = dir.join("cache").to_string_lossy().into_owned();
    config.listen.interval_ms = 50;
    config.listen.heartbeat_ms = 50;
    config.listen.recv_retry_ms = 20;
    config.reconnect.base_delay_ms = 20;
    config.reconnect.max_delay_ms = 1_000;
    config.reconnect.max_jitter_ms = 0;
    config.environment.mirror_on_change = false;
    config.credentials.registration_path = dir.join("register").to_string_lossy().into_owned();
    config.credentials.max_attempts = 1;
    config.credentials.retry_delay_ms = 1;
    config
}

pub fn write_registration(dir: &Path, group: &str, configs: &[&str]) {
    let configs: Vec<_> = configs
        .iter()
        .map(|name| serde_json::json!({ "configName": name, "writeAble": true }))
        .collect();
    let registration = serde_json::json!({
        "token": TOKEN,
        "backendName": BACKEND,
        "appGroupConfig": { "appGroupName": group, "configs": configs },
    });
    std::fs::write(dir.join("register"), registration.to_string()).unwrap();
}

pub fn key(name: &str) -> SubscriptionKey {
    SubscriptionKey::new("it-group", name)
}

pub fn yaml_record(private: &str, version: &str) -> ConfigRecord {
    ConfigRecord {
        private: private.to_string(),
        version: version.to_string(),
        format: Some(Format::Yaml),
        ..Default::default()
    }
}

pub fn full_record(version: &str) -> ConfigRecord {
    ConfigRecord {
        private: "db:\n  host: db.local\n  port: 5432\n".to_string(),
        version: version.to_string(),
        format: Some(Format::Yaml),
        public: r#"{"region":"eu"}"#.to_string(),
        public_version: version.to_string(),
        public_format: Some(Format::Json),
        services: r#"{"billing":{"primary":{"internalAddress":"10.0.0.1","port":80,"targetPort":8080}}}"#
            .to_string(),
    }
}

/// Callback that records every event it sees.
pub fn recorder() -> (OnChange, Arc<Mutex<Vec<ChangeEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: OnChange = Arc::new(move |event: &ChangeEvent| sink.lock().push(event.clone()));
    (callback, events)
}

/// Poll `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Fail the test if `future` does not finish within `timeout`.
pub async fn within<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .expect("operation did not finish in time")
}
