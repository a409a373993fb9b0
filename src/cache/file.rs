//! File-backed cache adapter.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::observability::metrics;
use crate::store::record::{ConfigRecord, KeyValueConfig, SubscriptionKey};

const RECORD_SUFFIX: &str = "config";
const KEY_VALUE_SUFFIX: &str = "keyvalue_config";

/// Errors raised by explicit cache reads.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("no cached config at {0}")]
    NotFound(PathBuf),

    #[error("cache file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache file {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Persists one record file and one key/value file per subscription key.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the raw record file for `key`.
    pub fn record_path(&self, key: &SubscriptionKey) -> PathBuf {
        self.dir.join(format!("{}_{}", key.file_stem(), RECORD_SUFFIX))
    }

    /// Path of the flattened key/value file for `key`.
    pub fn key_value_path(&self, key: &SubscriptionKey) -> PathBuf {
        self.dir.join(format!("{}_{}", key.file_stem(), KEY_VALUE_SUFFIX))
    }

    /// Persist `record`. Best effort: failures are logged and dropped.
    pub fn write_through(&self, key: &SubscriptionKey, record: &ConfigRecord) {
        if let Err(e) = self.write_json(&self.record_path(key), record) {
            tracing::warn!(subscription = %key, error = %e, "Failed to write config cache");
            metrics::record_cache_write_failure();
            return;
        }

        let key_value = match KeyValueConfig::try_from(record) {
            Ok(kv) => kv,
            Err(e) => {
                tracing::warn!(subscription = %key, error = %e, "Skipping key/value cache, record does not flatten");
                return;
            }
        };
        if let Err(e) = self.write_json(&self.key_value_path(key), &key_value) {
            tracing::warn!(subscription = %key, error = %e, "Failed to write key/value cache");
            metrics::record_cache_write_failure();
        }
    }

    /// Last record written for `key`.
    pub fn read_fallback(&self, key: &SubscriptionKey) -> Result<ConfigRecord, CacheError> {
        self.read_json(&self.record_path(key))
    }

    /// Last key/value view written for `key`.
    pub fn read_key_value(&self, key: &SubscriptionKey) -> Result<KeyValueConfig, CacheError> {
        self.read_json(&self.key_value_path(key))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), CacheError> {
        let io_err = |source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.dir).map_err(io_err)?;

        // Write to a sibling file and rename, so readers never see a torn file.
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        let file = File::create(&tmp).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, value).map_err(|source| CacheError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        writer.flush().map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }

    fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<T, CacheError> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound(path.to_path_buf()))
            }
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_reader(BufReader::new(file)).map_err(|source| CacheError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::Format;
    use serde_json::json;

    fn record(version: &str) -> ConfigRecord {
        ConfigRecord {
            private: "a: 1\nb:\n  c: 2\n".into(),
            version: version.into(),
            format: Some(Format::Yaml),
            ..Default::default()
        }
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("nested").join("cache"));
        let key = SubscriptionKey::new("g", "n");

        cache.write_through(&key, &record("v1"));
        assert_eq!(cache.read_fallback(&key).unwrap(), record("v1"));

        let kv = cache.read_key_value(&key).unwrap();
        assert_eq!(kv.private.get("b.c"), Some(&json!(2)));
        assert!(cache.record_path(&key).ends_with("g_n_config"));
        assert!(cache.key_value_path(&key).ends_with("g_n_keyvalue_config"));
    }

    #[test]
    fn test_last_write_wins_including_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let key = SubscriptionKey::new("g", "n");

        cache.write_through(&key, &record("v1"));
        cache.write_through(&key, &ConfigRecord::default());
        assert!(cache.read_fallback(&key).unwrap().is_empty());
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let err = cache.read_fallback(&SubscriptionKey::new("x", "y")).unwrap_err();
        assert!(matches!(err, CacheError::NotFound(_)));
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let key = SubscriptionKey::new("g", "n");
        fs::write(cache.record_path(&key), "not json").unwrap();
        assert!(matches!(cache.read_fallback(&key), Err(CacheError::Json { .. })));
    }

    #[test]
    fn test_unflattenable_record_still_cached_raw() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());
        let key = SubscriptionKey::new("g", "bad");
        let bad = ConfigRecord {
            public: "{oops".into(),
            public_version: "v1".into(),
            public_format: Some(Format::Json),
            ..Default::default()
        };
        cache.write_through(&key, &bad);
        assert_eq!(cache.read_fallback(&key).unwrap(), bad);
        assert!(cache.read_key_value(&key).is_err());
    }
}
