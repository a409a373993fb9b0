//! Listen sessions: deltas, write-back updates, terminal errors and shutdown.

use std::time::Duration;

use config_sync::store::Section;
use config_sync::supervisor::Role;
use config_sync::transport::Status;
use config_sync::{ChangeEvent, ListenParams, SyncError};

mod common;

use common::{key, recorder, within, yaml_record, Harness};

const WAIT: Duration = Duration::from_secs(3);

fn change(key: &str, value: &str) -> ChangeEvent {
    ChangeEvent {
        section: Section::Private,
        key: key.to_string(),
        value: value.to_string(),
    }
}

#[tokio::test]
async fn test_listen_delivers_initial_state_and_deltas() {
    let h = Harness::start().await;
    h.server.set_config(key("app"), yaml_record("a: 1\nc: 3", "v1"));

    let (callback, events) = recorder();
    let mut params = ListenParams::new("it-group", "app");
    params.on_change = Some(callback);
    let handle = h.client.listen_config(params).unwrap();

    assert!(common::wait_until(WAIT, || events.lock().len() == 2).await);
    assert_eq!(*events.lock(), vec![change("a", "1"), change("c", "3")]);

    events.lock().clear();
    h.server.set_config(key("app"), yaml_record("a: 1\nb: 2", "v2"));
    assert!(common::wait_until(WAIT, || events.lock().len() == 2).await);
    assert_eq!(*events.lock(), vec![change("b", "2"), change("c", "")]);

    let cached = h.client.cache().read_fallback(&key("app")).unwrap();
    assert_eq!(cached.version, "v2");
    assert_eq!(handle.probe().live_workers(), 4);

    within(WAIT, h.client.close()).await;
    assert_eq!(handle.probe().live_workers(), 0);
}

#[tokio::test]
async fn test_heartbeats_flow_on_both_streams() {
    let h = Harness::start().await;
    h.server.set_config(key("app"), yaml_record("a: 1", "v1"));
    let _handle = h.client.listen_config(ListenParams::new("it-group", "app")).unwrap();

    assert!(common::wait_until(WAIT, || h.server.listen_frames(&key("app")) >= 3).await);
    assert!(common::wait_until(WAIT, || h.server.put_heartbeats(&key("app")) >= 2).await);
    assert_eq!(h.server.put_registrations(&key("app")), 1);
    within(WAIT, h.client.close()).await;
}

#[tokio::test]
async fn test_put_updates_are_acknowledged_and_applied() {
    let h = Harness::start().await;
    h.server.set_config(key("app"), yaml_record("a: 1", "v1"));
    let (callback, events) = recorder();
    let handle = h
        .client
        .listen_config(ListenParams {
            on_change: Some(callback),
            ..ListenParams::new("it-group", "app")
        })
        .unwrap();
    assert!(common::wait_until(WAIT, || h.server.put_registrations(&key("app")) == 1).await);
    assert!(common::wait_until(WAIT, || events.lock().len() == 1).await);

    let message = h.server.push_update(key("app"), yaml_record("a: 9", "v2"));
    assert!(common::wait_until(WAIT, || h.server.acks().contains(&message)).await);
    assert!(common::wait_until(WAIT, || events.lock().contains(&change("a", "9"))).await);

    let kv = h.client.cached_key_value_config("it-group", "app").unwrap();
    assert_eq!(kv.version, "v2");
    assert_eq!(kv.private["a"], serde_json::json!(9));
    assert_eq!(handle.probe().live_workers(), 4);
    within(WAIT, h.client.close()).await;
}

#[tokio::test]
async fn test_failed_ack_still_applies_update() {
    let h = Harness::start().await;
    h.server.set_config(key("app"), yaml_record("a: 1", "v1"));
    let (callback, events) = recorder();
    h.client
        .listen_config(ListenParams {
            on_change: Some(callback),
            ..ListenParams::new("it-group", "app")
        })
        .unwrap();
    assert!(common::wait_until(WAIT, || h.server.put_registrations(&key("app")) == 1).await);

    h.server.fail_next_calls(Status::internal("ack store down"), 2);
    h.server.push_update(key("app"), yaml_record("a: 2", "v2"));
    assert!(common::wait_until(WAIT, || events.lock().contains(&change("a", "2"))).await);
    assert!(h.server.acks().is_empty());
    within(WAIT, h.client.close()).await;
}

#[tokio::test]
async fn test_close_is_bounded_while_ack_is_stalled() {
    let h = Harness::start().await;
    h.server.set_config(key("app"), yaml_record("a: 1", "v1"));
    let handle = h.client.listen_config(ListenParams::new("it-group", "app")).unwrap();
    assert!(common::wait_until(WAIT, || h.server.put_registrations(&key("app")) == 1).await);

    h.server.stall_acks(true);
    h.server.push_update(key("app"), yaml_record("a: 5", "v2"));
    assert!(common::wait_until(WAIT, || h.server.stalled_acks() == 1).await);

    within(Duration::from_secs(1), h.client.close()).await;
    assert_eq!(handle.probe().live_workers(), 0);
    assert_eq!(h.server.stalled_acks(), 0);
    assert!(h.server.acks().is_empty());
}

#[tokio::test]
async fn test_unknown_key_stops_listen_workers() {
    let h = Harness::start().await;
    let handle = h.client.listen_config(ListenParams::new("it-group", "missing")).unwrap();
    let probe = handle.probe().clone();

    assert!(
        common::wait_until(WAIT, || {
            !probe.is_alive(Role::ListenRecv) && !probe.is_alive(Role::ListenSend)
        })
        .await
    );
    assert!(probe.is_alive(Role::PutSend));
    assert!(probe.is_alive(Role::PutRecv));
    within(WAIT, h.client.close()).await;
    assert_eq!(probe.live_workers(), 0);
}

#[tokio::test]
async fn test_server_ending_streams_is_terminal() {
    let h = Harness::start().await;
    h.server.set_config(key("app"), yaml_record("a: 1", "v1"));
    let handle = h.client.listen_config(ListenParams::new("it-group", "app")).unwrap();
    assert!(common::wait_until(WAIT, || h.server.listeners(&key("app")) == 1).await);

    h.server.end_streams();
    let probe = handle.probe().clone();
    assert!(
        common::wait_until(WAIT, || {
            !probe.is_alive(Role::ListenRecv) && !probe.is_alive(Role::PutRecv)
        })
        .await
    );
    within(WAIT, h.client.close()).await;
}

#[tokio::test]
async fn test_sessions_on_same_key_are_independent() {
    let h = Harness::start().await;
    h.server.set_config(key("app"), yaml_record("a: 1", "v1"));
    let first = h.client.listen_config(ListenParams::new("it-group", "app")).unwrap();
    let second = h.client.listen_config(ListenParams::new("it-group", "app")).unwrap();
    assert_ne!(first.id(), second.id());
    assert!(common::wait_until(WAIT, || h.server.listeners(&key("app")) == 2).await);

    within(WAIT, h.client.stop_listening(&first)).await;
    assert_eq!(first.probe().live_workers(), 0);
    assert_eq!(second.probe().live_workers(), 4);
    assert!(common::wait_until(WAIT, || h.server.listeners(&key("app")) == 1).await);
    within(WAIT, h.client.close()).await;
}

#[tokio::test]
async fn test_close_immediately_after_listen_is_bounded() {
    let h = Harness::start().await;
    h.server.set_config(key("app"), yaml_record("a: 1", "v1"));
    let handle = h.client.listen_config(ListenParams::new("it-group", "app")).unwrap();

    within(Duration::from_secs(1), h.client.close()).await;
    assert_eq!(handle.probe().live_workers(), 0);
    assert_eq!(h.server.live_listen_streams(), 0);
    assert_eq!(h.server.live_put_streams(), 0);
}

#[tokio::test]
async fn test_close_while_disconnected_is_bounded() {
    let server = config_sync::transport::memory::MemoryConfigServer::new();
    server.set_down(true);
    let h = Harness::start_with(server, |_| {}).await;
    assert!(!h.client.is_connected());
    let handle = h.client.listen_config(ListenParams::new("it-group", "app")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    within(Duration::from_secs(1), h.client.close()).await;
    assert_eq!(handle.probe().live_workers(), 0);
}

#[tokio::test]
async fn test_listen_defaults_uses_registration() {
    let h = Harness::start().await;
    h.server.set_config(key("first"), yaml_record("a: 1", "v1"));
    h.server.set_config(key("second"), yaml_record("b: 1", "v1"));

    let handles = h.client.listen_defaults(None).unwrap();
    let mut names: Vec<_> = handles.iter().map(|h| h.key().name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["first", "second"]);
    assert!(common::wait_until(WAIT, || h.server.listeners(&key("second")) == 1).await);
    within(WAIT, h.client.close()).await;
}

#[tokio::test]
async fn test_listen_rejects_unresolvable_key() {
    let h = Harness::start().await;
    std::fs::remove_file(h.dir.path().join("register")).unwrap();
    let err = h.client.listen_config(ListenParams::new("", "")).unwrap_err();
    assert!(matches!(err, SyncError::InvalidKey(_)));
}

#[tokio::test]
async fn test_changes_mirrored_into_environment() {
    let h = Harness::start_with(
        config_sync::transport::memory::MemoryConfigServer::new(),
        |config| config.environment.mirror_on_change = true,
    )
    .await;
    h.server
        .set_config(key("env"), yaml_record("CONFIG_SYNC_IT_MIRRORED: on", "v1"));
    h.client.listen_config(ListenParams::new("it-group", "env")).unwrap();
    assert!(
        common::wait_until(WAIT, || {
            std::env::var("CONFIG_SYNC_IT_MIRRORED").as_deref() == Ok("on")
        })
        .await
    );

    h.server.set_config(key("env"), yaml_record("other: 1", "v2"));
    assert!(
        common::wait_until(WAIT, || std::env::var("CONFIG_SYNC_IT_MIRRORED").is_err()).await
    );
    within(WAIT, h.client.close()).await;
}
