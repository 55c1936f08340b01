//! Page session lifecycle tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashboard_feed::config::{HeartbeatConfig, ReconnectConfig, TransportConfig};
use dashboard_feed::heartbeat::current_epoch_secs;
use dashboard_feed::indicator::TracingIndicator;
use dashboard_feed::io::{HttpClient, HttpResponse, MemoryConnector};
use dashboard_feed::{Config, FeedError, HeartbeatStatus, PageSession, Subscription};
use serde_json::json;

const TOKEN: &str = "3fa85f64-5717-4562-b3fc-2c963f66afa6";

/// Every service reports a heartbeat that is overdue except `rubintv`
struct FixedHttp;

#[async_trait]
impl HttpClient for FixedHttp {
    async fn get(&self, url: &str) -> dashboard_feed::Result<HttpResponse> {
        let service = url.rsplit('/').next().unwrap_or_default();
        let now = current_epoch_secs();
        let next = if service == "rubintv" { now + 100.0 } else { now - 100.0 };
        Ok(HttpResponse {
            status: 200,
            body: json!({"channel": service, "currTime": now, "nextExpected": next}).to_string(),
        })
    }
}

fn page_config() -> Config {
    Config {
        page_url: "http://localhost:8000/rubintv/summit/ccs".to_string(),
        transport: TransportConfig {
            reconnect: ReconnectConfig {
                max_retries: 3,
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
            },
            ..Default::default()
        },
        subscriptions: vec![Subscription::service(
            "camera",
            Some("summit"),
            Some("ccs"),
            None,
        )],
        heartbeats: vec![
            HeartbeatConfig {
                depends_on: Some("rubintv".to_string()),
                push_channel: Some("camera".to_string()),
                ..HeartbeatConfig::new("summit")
            },
            HeartbeatConfig::new("rubintv"),
        ],
        ..Default::default()
    }
}

async fn wait_for(handle: &dashboard_feed::HeartbeatHandle, expected: HeartbeatStatus) {
    let mut status = handle.watch_status();
    tokio::time::timeout(Duration::from_secs(2), status.wait_for(|s| *s == expected))
        .await
        .unwrap_or_else(|_| panic!("{} never became {}", handle.service(), expected))
        .unwrap();
}

#[tokio::test]
async fn test_session_wires_feed_and_monitors() {
    let (connector, mut listener) = MemoryConnector::new();
    let session = PageSession::start(
        page_config(),
        connector,
        Arc::new(FixedHttp),
        Arc::new(TracingIndicator::new()),
    )
    .await
    .unwrap();

    assert_eq!(
        session.endpoints().socket_url,
        "ws://localhost:8000/rubintv/ws"
    );

    let mut server = listener.accept().await.unwrap();
    server.send(TOKEN);
    let request: serde_json::Value =
        serde_json::from_str(&server.recv().await.unwrap()).unwrap();
    assert_eq!(request["message"], "camera summit/ccs");

    let rubintv = session.heartbeat("rubintv").unwrap();
    let summit = session.heartbeat("summit").unwrap();
    wait_for(rubintv, HeartbeatStatus::Active).await;
    wait_for(summit, HeartbeatStatus::Stopped).await;

    // a heartbeat pushed through the feed lands on the page channel
    let now = current_epoch_secs();
    server.send(
        json!({
            "dataType": "heartbeat",
            "payload": {"channel": "summit", "currTime": now, "nextExpected": now + 60.0},
        })
        .to_string(),
    );
    wait_for(summit, HeartbeatStatus::Active).await;

    let mut camera = session.bus().subscribe("camera").await;
    session.shutdown().await;
    assert!(camera.recv().await.is_err());
}

#[tokio::test]
async fn test_unknown_dependency_fails_start() {
    let mut config = page_config();
    config.heartbeats = vec![HeartbeatConfig {
        depends_on: Some("nowhere".to_string()),
        ..HeartbeatConfig::new("summit")
    }];
    let (connector, _listener) = MemoryConnector::new();

    let result = PageSession::start(
        config,
        connector,
        Arc::new(FixedHttp),
        Arc::new(TracingIndicator::new()),
    )
    .await;
    assert!(matches!(result, Err(FeedError::Config(_))));
}

#[tokio::test]
async fn test_invalid_page_url_fails_start() {
    let mut config = page_config();
    config.page_url = "mailto:someone@example.org".to_string();
    let (connector, _listener) = MemoryConnector::new();

    let result = PageSession::start(
        config,
        connector,
        Arc::new(FixedHttp),
        Arc::new(TracingIndicator::new()),
    )
    .await;
    assert!(matches!(result, Err(FeedError::Config(_))));
}
