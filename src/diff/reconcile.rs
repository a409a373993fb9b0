//! Section-by-section reconciliation of an incoming delta.

use crate::flatten::{stringify, DecodeError, FlatMap};
use crate::store::record::{ChangeEvent, ConfigRecord, Section};

/// Reconcile `incoming` against `current`, reporting every changed key to `sink`.
///
/// A section takes part only when its version in `incoming` is non-empty;
/// `services` follows `public_version`. Every participating section of both
/// records is decoded before the first event is emitted, so a malformed body
/// fails the whole delta and `sink` sees nothing.
///
/// Returns the record the store should hold afterwards.
pub fn reconcile<F>(
    current: &ConfigRecord,
    incoming: &ConfigRecord,
    mut sink: F,
) -> Result<ConfigRecord, DecodeError>
where
    F: FnMut(ChangeEvent),
{
    let public_changed = !incoming.public_version.is_empty();
    let private_changed = !incoming.version.is_empty();

    let mut diffs = Vec::with_capacity(3);
    if public_changed {
        diffs.push((Section::Public, current.flat_public()?, incoming.flat_public()?));
    }
    if private_changed {
        diffs.push((Section::Private, current.flat_private()?, incoming.flat_private()?));
    }
    if public_changed {
        diffs.push((
            Section::Services,
            current.flat_services()?,
            incoming.flat_services()?,
        ));
    }

    for (section, previous, next) in &diffs {
        diff_section(*section, previous, next, &mut sink);
    }

    let mut updated = current.clone();
    if public_changed {
        updated.public = incoming.public.clone();
        updated.public_version = incoming.public_version.clone();
        updated.public_format = incoming.public_format;
        updated.services = incoming.services.clone();
    }
    if private_changed {
        updated.private = incoming.private.clone();
        updated.version = incoming.version.clone();
        updated.format = incoming.format;
    }
    Ok(updated)
}

/// Emit one event per added or changed key, then one tombstone per removed key.
pub fn diff_section<F>(section: Section, previous: &FlatMap, next: &FlatMap, sink: &mut F)
where
    F: FnMut(ChangeEvent),
{
    for (key, value) in next {
        if previous.get(key) != Some(value) {
            sink(ChangeEvent {
                section,
                key: key.clone(),
                value: stringify(value),
            });
        }
    }
    for key in previous.keys() {
        if !next.contains_key(key) {
            sink(ChangeEvent {
                section,
                key: key.clone(),
                value: String::new(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::Format;

    fn yaml_public(body: &str, version: &str) -> ConfigRecord {
        ConfigRecord {
            public: body.into(),
            public_version: version.into(),
            public_format: Some(Format::Yaml),
            ..Default::default()
        }
    }

    fn collect(current: &ConfigRecord, incoming: &ConfigRecord) -> (ConfigRecord, Vec<ChangeEvent>) {
        let mut events = Vec::new();
        let updated = reconcile(current, incoming, |e| events.push(e)).unwrap();
        (updated, events)
    }

    fn event(section: Section, key: &str, value: &str) -> ChangeEvent {
        ChangeEvent {
            section,
            key: key.into(),
            value: value.into(),
        }
    }

    #[test]
    fn test_add_change_and_tombstone() {
        let previous = yaml_public("a: 1\nc: 3", "v1");
        let incoming = yaml_public("a: 1\nb: 2", "v2");
        let (updated, events) = collect(&previous, &incoming);

        assert_eq!(
            events,
            vec![event(Section::Public, "b", "2"), event(Section::Public, "c", "")]
        );
        assert_eq!(updated.public_version, "v2");
        assert_eq!(updated.public, "a: 1\nb: 2");
    }

    #[test]
    fn test_empty_version_leaves_section_untouched() {
        let previous = ConfigRecord {
            private: "k: v".into(),
            version: "p1".into(),
            format: Some(Format::Yaml),
            ..yaml_public("a: 1", "v1")
        };
        let incoming = ConfigRecord {
            private: String::new(),
            version: String::new(),
            ..yaml_public("a: 2", "v2")
        };
        let (updated, events) = collect(&previous, &incoming);

        assert_eq!(events, vec![event(Section::Public, "a", "2")]);
        assert_eq!(updated.private, "k: v");
        assert_eq!(updated.version, "p1");
    }

    #[test]
    fn test_idempotent() {
        let previous = yaml_public("a: 1", "v1");
        let incoming = yaml_public("a: 1\nb: [x]", "v2");
        let (updated, first) = collect(&previous, &incoming);
        assert_eq!(first, vec![event(Section::Public, "b.0", "x")]);

        let (again, second) = collect(&updated, &incoming);
        assert!(second.is_empty());
        assert_eq!(again, updated);
    }

    #[test]
    fn test_version_advances_without_key_changes() {
        let previous = yaml_public("a: 1", "v1");
        let incoming = yaml_public("a: 1", "v9");
        let (updated, events) = collect(&previous, &incoming);
        assert!(events.is_empty());
        assert_eq!(updated.public_version, "v9");
    }

    #[test]
    fn test_malformed_delta_emits_nothing() {
        let previous = ConfigRecord {
            private: "k: v".into(),
            version: "p1".into(),
            format: Some(Format::Yaml),
            ..Default::default()
        };
        let incoming = ConfigRecord {
            private: "k: changed".into(),
            version: "p2".into(),
            format: Some(Format::Yaml),
            public: "{broken".into(),
            public_version: "v2".into(),
            public_format: Some(Format::Json),
            ..Default::default()
        };
        let mut events = Vec::new();
        let result = reconcile(&previous, &incoming, |e| events.push(e));
        assert!(result.is_err());
        assert!(events.is_empty());
    }

    #[test]
    fn test_services_follow_public_version() {
        let previous = ConfigRecord {
            services: r#"{"svc":{"a":{"port":1}}}"#.into(),
            ..yaml_public("x: 1", "v1")
        };
        let incoming = ConfigRecord {
            services: r#"{"svc":{"a":{"port":2}}}"#.into(),
            ..yaml_public("x: 1", "v2")
        };
        let (updated, events) = collect(&previous, &incoming);
        assert_eq!(events, vec![event(Section::Services, "svc.a.port", "2")]);
        assert_eq!(updated.services, incoming.services);
    }

    #[test]
    fn test_type_mismatch_counts_as_change() {
        let previous = ConfigRecord {
            public: r#"{"n":"1"}"#.into(),
            public_version: "v1".into(),
            public_format: Some(Format::Json),
            ..Default::default()
        };
        let incoming = ConfigRecord {
            public: r#"{"n":1}"#.into(),
            public_version: "v2".into(),
            public_format: Some(Format::Json),
            ..Default::default()
        };
        let (_, events) = collect(&previous, &incoming);
        assert_eq!(events, vec![event(Section::Public, "n", "1")]);
    }
}
