//! Dashboard feed - real-time event distribution for observatory dashboards
//!
//! Keeps one reconnecting WebSocket open to the dashboard backend, performs
//! the session handshake, decodes and validates server events and publishes
//! them on an in-process event bus. Heartbeat monitors track the liveness
//! of backend services alongside the feed.

pub mod bus;
pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod envelope;
pub mod error;
pub mod heartbeat;
pub mod indicator;
pub mod io;
pub mod router;
pub mod session;
pub mod subscription;

pub use bus::EventBus;
pub use client::{probe_historical_status, FeedClient};
pub use config::{derive_endpoints, load_config, Config, Endpoints};
pub use envelope::{Notification, NotificationBody};
pub use error::{FeedError, Result};
pub use heartbeat::{HeartbeatHandle, HeartbeatMonitor, HeartbeatRecord};
pub use indicator::{HeartbeatStatus, IndicatorView, StatusIndicator};
pub use session::Session;
pub use subscription::Subscription;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::config::HeartbeatConfig;
use crate::indicator::TracingIndicator;
use crate::io::{HttpClient, ReqwestHttpClient, SocketConnector, WsConnector};

/// Everything one dashboard page needs, started and torn down together
pub struct PageSession {
    endpoints: Endpoints,
    bus: EventBus,
    client: FeedClient,
    monitors: Vec<HeartbeatHandle>,
    cancel: CancellationToken,
}

impl PageSession {
    /// Derive endpoints, open the feed and start heartbeat monitors
    ///
    /// Monitors start in dependency order so each one can watch the status
    /// of the service it depends on.
    pub async fn start(
        config: Config,
        connector: Arc<dyn SocketConnector>,
        http: Arc<dyn HttpClient>,
        indicator: Arc<dyn StatusIndicator>,
    ) -> Result<PageSession> {
        let endpoints = derive_endpoints(&config.page_url, &config.transport.socket_path)?;
        let heartbeats = heartbeat_order(&config.heartbeats)?;

        tracing::info!("Opening dashboard feed at {}", endpoints.socket_url);
        let bus = EventBus::new(config.bus_capacity);
        let client = FeedClient::start(
            &config.transport,
            endpoints.socket_url.clone(),
            connector,
            bus.clone(),
        );
        for subscription in &config.subscriptions {
            tracing::debug!("Subscribing to {}", subscription);
            client.subscribe(subscription.clone()).await?;
        }

        let cancel = CancellationToken::new();
        let mut monitors: Vec<HeartbeatHandle> = Vec::new();
        for heartbeat in heartbeats {
            let mut monitor = HeartbeatMonitor::new(
                heartbeat.clone(),
                endpoints.heartbeat_url(&heartbeat.service),
                Arc::clone(&http),
                Arc::clone(&indicator),
            );
            if let Some(dependency) = &heartbeat.depends_on {
                if let Some(handle) = monitors.iter().find(|m| m.service() == dependency) {
                    monitor = monitor.depends_on(handle.watch_status());
                }
            }
            if let Some(channel) = &heartbeat.push_channel {
                monitor = monitor.with_push_channel(bus.subscribe(channel).await);
            }
            monitors.push(monitor.spawn(cancel.child_token()));
        }

        tracing::info!(
            "Page session started: {} subscription(s), {} heartbeat monitor(s)",
            config.subscriptions.len(),
            monitors.len()
        );

        Ok(PageSession {
            endpoints,
            bus,
            client,
            monitors,
            cancel,
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn client(&self) -> &FeedClient {
        &self.client
    }

    pub fn heartbeat(&self, service: &str) -> Option<&HeartbeatHandle> {
        self.monitors.iter().find(|m| m.service() == service)
    }

    /// Stop monitors, close the feed and close the bus
    pub async fn shutdown(self) {
        tracing::debug!("Shutting down page session");
        self.cancel.cancel();
        for monitor in self.monitors {
            monitor.shutdown().await;
        }
        self.client.close().await;
        self.bus.close().await;
        tracing::info!("Page session stopped");
    }
}

/// Order heartbeat configs so every service comes after its dependency
///
/// Duplicate services, unknown dependencies and dependency cycles are
/// configuration errors.
pub fn heartbeat_order(configs: &[HeartbeatConfig]) -> Result<Vec<&HeartbeatConfig>> {
    for (index, config) in configs.iter().enumerate() {
        if configs[..index].iter().any(|c| c.service == config.service) {
            return Err(FeedError::Config(format!(
                "Heartbeat service '{}' configured more than once",
                config.service
            )));
        }
        if let Some(dependency) = &config.depends_on {
            if !configs.iter().any(|c| &c.service == dependency) {
                return Err(FeedError::Config(format!(
                    "Heartbeat service '{}' depends on unknown service '{}'",
                    config.service, dependency
                )));
            }
        }
    }

    let mut ordered: Vec<&HeartbeatConfig> = Vec::with_capacity(configs.len());
    while ordered.len() < configs.len() {
        let before = ordered.len();
        for config in configs {
            let placed = ordered.iter().any(|c| c.service == config.service);
            let ready = config
                .depends_on
                .as_ref()
                .is_none_or(|d| ordered.iter().any(|c| &c.service == d));
            if !placed && ready {
                ordered.push(config);
            }
        }
        if ordered.len() == before {
            let stuck: Vec<&str> = configs
                .iter()
                .filter(|c| !ordered.iter().any(|o| o.service == c.service))
                .map(|c| c.service.as_str())
                .collect();
            return Err(FeedError::Config(format!(
                "Heartbeat dependency cycle between: {}",
                stuck.join(", ")
            )));
        }
    }
    Ok(ordered)
}

/// Run the feed until Ctrl-C or until the transport gives up
pub async fn run(config: Config) -> Result<()> {
    let mut channels: Vec<String> = Vec::new();
    for subscription in &config.subscriptions {
        let name = subscription.event_name().to_string();
        if !channels.contains(&name) {
            channels.push(name);
        }
    }

    let session = PageSession::start(
        config,
        Arc::new(WsConnector::new()),
        Arc::new(ReqwestHttpClient::new()),
        Arc::new(TracingIndicator::new()),
    )
    .await?;

    for channel in channels {
        let receiver = session.bus().subscribe(&channel).await;
        tokio::spawn(log_notifications(channel, receiver));
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(e) => tracing::warn!("Failed to listen for ctrl-c: {}", e),
        },
        _ = session.client().closed() => {
            tracing::warn!("Dashboard feed stopped");
        }
    }

    session.shutdown().await;
    Ok(())
}

/// Ask the backend once for its historical-data status
pub async fn probe(config: &Config, timeout: Duration) -> Result<Notification> {
    let endpoints = derive_endpoints(&config.page_url, &config.transport.socket_path)?;
    probe_historical_status(
        &config.transport,
        endpoints.socket_url,
        Arc::new(WsConnector::new()),
        timeout,
    )
    .await
}

async fn log_notifications(channel: String, mut receiver: broadcast::Receiver<Notification>) {
    loop {
        match receiver.recv().await {
            Ok(notification) => {
                match &notification.body {
                    NotificationBody::Data(_) => tracing::info!(
                        "[{}] {} ({})",
                        channel,
                        notification.data_type,
                        notification.datestamp.as_deref().unwrap_or("no datestamp")
                    ),
                    NotificationBody::Error(reason) => tracing::warn!(
                        "[{}] {} could not be decoded: {}",
                        channel,
                        notification.data_type,
                        reason
                    ),
                }
                if let Ok(json) = serde_json::to_string(&notification) {
                    tracing::debug!("[{}] {}", channel, json);
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    "[{}] listener lagged, {} notification(s) skipped",
                    channel,
                    skipped
                );
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
