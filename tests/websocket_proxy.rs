//! End-to-end WebSocket tests through the proxy.

use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};

mod common;

#[tokio::test]
async fn test_messages_round_trip_unchanged() {
    let upstream = common::start_ws_echo_backend().await;
    let (proxy, _shutdown) = common::start_proxy(common::proxy_config(upstream)).await;

    let (mut ws, response) = connect_async(format!("ws://{proxy}/echo")).await.unwrap();
    assert_eq!(response.status(), 101);

    let binary: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
    ws.send(Message::binary(binary.clone())).await.unwrap();
    ws.send(Message::text("hello through the proxy".to_string())).await.unwrap();

    let first = ws.next().await.unwrap().unwrap();
    assert_eq!(first.into_data().as_ref(), binary.as_slice());
    let second = ws.next().await.unwrap().unwrap();
    assert_eq!(second.into_text().unwrap().as_str(), "hello through the proxy");

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_download_is_throttled() {
    let upstream = common::start_ws_echo_backend().await;
    let mut config = common::proxy_config(upstream);
    config.websocket_rate_limit.down_byte_rate = 4000;
    config.websocket_rate_limit.down_burst_limit = 1000;
    config.websocket_rate_limit.time_window = 1;
    let (proxy, _shutdown) = common::start_proxy(config).await;

    let (mut ws, _) = connect_async(format!("ws://{proxy}/")).await.unwrap();

    let start = Instant::now();
    ws.send(Message::binary(vec![9u8; 5000])).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(echoed.into_data().len(), 5000);
    // 4000 bytes beyond the burst at 4000 B/s.
    assert!(elapsed >= Duration::from_millis(800), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn test_upload_is_throttled() {
    let upstream = common::start_ws_echo_backend().await;
    let mut config = common::proxy_config(upstream);
    config.websocket_rate_limit.up_byte_rate = 4000;
    config.websocket_rate_limit.up_burst_limit = 1000;
    config.websocket_rate_limit.time_window = 1;
    let (proxy, _shutdown) = common::start_proxy(config).await;

    let (mut ws, _) = connect_async(format!("ws://{proxy}/")).await.unwrap();

    let start = Instant::now();
    ws.send(Message::binary(vec![3u8; 5000])).await.unwrap();
    let echoed = ws.next().await.unwrap().unwrap();
    let elapsed = start.elapsed();

    assert_eq!(echoed.into_data().len(), 5000);
    assert!(elapsed >= Duration::from_millis(800), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "elapsed {elapsed:?}");
}

#[tokio::test]
async fn test_unlimited_tunnel_is_not_delayed() {
    let upstream = common::start_ws_echo_backend().await;
    let (proxy, _shutdown) = common::start_proxy(common::proxy_config(upstream)).await;

    let (mut ws, _) = connect_async(format!("ws://{proxy}/")).await.unwrap();

    let start = Instant::now();
    for _ in 0..20 {
        ws.send(Message::binary(vec![1u8; 4096])).await.unwrap();
        ws.next().await.unwrap().unwrap();
    }
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_shutdown_closes_open_tunnels() {
    let upstream = common::start_ws_echo_backend().await;
    let (proxy, shutdown) = common::start_proxy(common::proxy_config(upstream)).await;

    let (mut ws, _) = connect_async(format!("ws://{proxy}/")).await.unwrap();
    ws.send(Message::text("ping".to_string())).await.unwrap();
    ws.next().await.unwrap().unwrap();

    shutdown.trigger();

    let next = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("tunnel should close on shutdown");
    assert!(!matches!(next, Some(Ok(Message::Text(_)))));
}

#[tokio::test]
async fn test_refused_upgrade_is_passed_through() {
    let upstream = common::start_mock_backend("not a websocket").await;
    let (proxy, _shutdown) = common::start_proxy(common::proxy_config(upstream)).await;

    match connect_async(format!("ws://{proxy}/")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 200),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake should not succeed"),
    }
}

#[tokio::test]
async fn test_unreachable_upstream_is_bad_gateway() {
    let upstream = common::closed_port().await;
    let (proxy, _shutdown) = common::start_proxy(common::proxy_config(upstream)).await;

    match connect_async(format!("ws://{proxy}/")).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 502),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("handshake should not succeed"),
    }
}
