//! Connection hub behavior through its public handle.

use im_message_service::{config::HubConfig, websocket::Hub};
use serde_json::{json, Value};
use std::time::Duration;

#[tokio::test]
async fn fans_out_to_every_session_and_tracks_presence() {
    let (registry, _task) = Hub::spawn(HubConfig::default());

    let (first, mut rx_a) = registry.register(10).await.unwrap();
    let (_second, mut rx_b) = registry.register(10).await.unwrap();
    let _other = registry.register(11).await.unwrap();

    let stats = registry.stats().await;
    assert_eq!((stats.online_users, stats.sessions), (2, 3));
    assert!(registry.is_online(10).await);
    assert!(!registry.is_online(12).await);

    assert!(registry.send_to_user(10, "typing", json!({"from_user_id": 11})).await);
    for rx in [&mut rx_a, &mut rx_b] {
        let frame: Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame, json!({"type": "typing", "content": {"from_user_id": 11}}));
    }

    registry.unregister(first).await;
    registry.unregister(first).await;
    assert_eq!(registry.stats().await.sessions, 2);
    assert!(registry.is_online(10).await);
}

#[tokio::test]
async fn offline_user_is_reported_undelivered() {
    let (registry, _task) = Hub::spawn(HubConfig::default());
    assert!(!registry.send_to_user(99, "new_message", json!({})).await);
}

#[tokio::test]
async fn slow_session_is_evicted_without_blocking_others() {
    let (registry, _task) = Hub::spawn(HubConfig {
        outbound_queue: 1,
        ..HubConfig::default()
    });
    let (_slow, mut slow_rx) = registry.register(5).await.unwrap();

    assert!(registry.send_frame(5, "one".into()).await);
    // Queue of one is full now.
    assert!(!registry.send_frame(5, "two".into()).await);
    assert!(!registry.is_online(5).await);

    assert_eq!(slow_rx.recv().await.as_deref(), Some("one"));
    assert_eq!(slow_rx.recv().await, None);
}

#[tokio::test]
async fn dropped_receiver_is_cleaned_up_on_next_send() {
    let (registry, _task) = Hub::spawn(HubConfig::default());
    let (_sid, rx) = registry.register(3).await.unwrap();
    drop(rx);

    assert!(!registry.send_frame(3, "hello".into()).await);
    assert_eq!(registry.stats().await.sessions, 0);
}

#[tokio::test]
async fn shutdown_closes_sessions_and_stops_the_task() {
    let (registry, task) = Hub::spawn(HubConfig::default());
    let (_sid, mut rx) = registry.register(1).await.unwrap();

    registry.shutdown().await;

    assert_eq!(rx.recv().await, None);
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("hub stops")
        .expect("hub task did not panic");
    assert!(registry.register(1).await.is_err());
    assert!(!registry.is_online(1).await);
}
