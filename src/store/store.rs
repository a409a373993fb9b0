//! The Config Store for one subscription key.

use parking_lot::RwLock;

use crate::cache::FileCache;
use crate::diff::{self, env};
use crate::flatten::DecodeError;
use crate::store::record::{ChangeEvent, ConfigRecord, SubscriptionKey};
use crate::transport::ConfigVersion;

/// Side effects performed while the store's write lock is held.
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions<'a> {
    /// Write the updated record through to this cache.
    pub cache: Option<&'a FileCache>,
    /// Mirror every change event into the process environment.
    pub mirror_env: bool,
}

/// Holds the last known record for one key.
#[derive(Debug)]
pub struct ConfigStore {
    key: SubscriptionKey,
    record: RwLock<ConfigRecord>,
}

impl ConfigStore {
    pub fn new(key: SubscriptionKey) -> Self {
        Self::with_record(key, ConfigRecord::default())
    }

    pub fn with_record(key: SubscriptionKey, record: ConfigRecord) -> Self {
        Self {
            key,
            record: RwLock::new(record),
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn snapshot(&self) -> ConfigRecord {
        self.record.read().clone()
    }

    /// The versions frame a listen-send worker transmits.
    pub fn versions(&self) -> ConfigVersion {
        ConfigVersion::for_record(&self.key, &self.record.read())
    }

    /// Reconcile `delta` into the stored record.
    ///
    /// On error nothing is replaced, mirrored or cached.
    pub fn apply(
        &self,
        delta: &ConfigRecord,
        options: &ApplyOptions<'_>,
    ) -> Result<Vec<ChangeEvent>, DecodeError> {
        let mut record = self.record.write();
        let mut events = Vec::new();
        let updated = diff::reconcile(&record, delta, |event| events.push(event))?;
        *record = updated;

        if options.mirror_env {
            for event in &events {
                env::mirror(event);
            }
        }
        // Blocking file write under the lock: cache files never run behind the record.
        if let Some(cache) = options.cache {
            cache.write_through(&self.key, &record);
        }
        Ok(events)
    }

    /// Replace the record without diffing. Used for cache warm-up.
    pub fn replace(&self, record: ConfigRecord) {
        *self.record.write() = record;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::Format;
    use crate::store::record::Section;

    fn key() -> SubscriptionKey {
        SubscriptionKey::new("store", "unit")
    }

    fn private(body: &str, version: &str) -> ConfigRecord {
        ConfigRecord {
            private: body.into(),
            version: version.into(),
            format: Some(Format::Json),
            ..Default::default()
        }
    }

    #[test]
    fn test_apply_updates_and_reports() {
        let store = ConfigStore::new(key());
        let events = store
            .apply(&private(r#"{"a":"1"}"#, "v1"), &ApplyOptions::default())
            .unwrap();
        assert_eq!(
            events,
            vec![ChangeEvent {
                section: Section::Private,
                key: "a".into(),
                value: "1".into()
            }]
        );
        assert_eq!(store.versions().version, "v1");
        assert_eq!(store.versions().group, "store");
    }

    #[test]
    fn test_failed_apply_keeps_record() {
        let store = ConfigStore::with_record(key(), private(r#"{"a":"1"}"#, "v1"));
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(cache_dir.path());
        let options = ApplyOptions {
            cache: Some(&cache),
            mirror_env: false,
        };

        assert!(store.apply(&private("{not json", "v2"), &options).is_err());
        assert_eq!(store.snapshot().version, "v1");
        assert!(cache.read_fallback(&key()).is_err());
    }

    #[test]
    fn test_apply_writes_through_and_mirrors() {
        let store = ConfigStore::new(key());
        let cache_dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(cache_dir.path());
        let options = ApplyOptions {
            cache: Some(&cache),
            mirror_env: true,
        };

        store
            .apply(&private(r#"{"CONFIG_SYNC_STORE_UNIT":"on"}"#, "v1"), &options)
            .unwrap();
        assert_eq!(std::env::var("CONFIG_SYNC_STORE_UNIT").unwrap(), "on");
        assert_eq!(cache.read_fallback(&key()).unwrap().version, "v1");

        store.apply(&private("{}", "v2"), &options).unwrap();
        assert!(std::env::var("CONFIG_SYNC_STORE_UNIT").is_err());
    }
}
