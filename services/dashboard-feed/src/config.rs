//! Configuration types for the dashboard feed

use std::path::Path;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::error::{FeedError, Result};
use crate::subscription::Subscription;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// URL of the dashboard page the feed belongs to
    #[serde(default = "default_page_url")]
    pub page_url: String,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub heartbeats: Vec<HeartbeatConfig>,
    /// Per-channel buffer of the event bus
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            page_url: default_page_url(),
            transport: TransportConfig::default(),
            subscriptions: Vec::new(),
            heartbeats: Vec::new(),
            bus_capacity: default_bus_capacity(),
        }
    }
}

/// Socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path appended to the application root to form the socket URL
    #[serde(default = "default_socket_path")]
    pub socket_path: String,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connection_timeout_seconds: default_connection_timeout(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl TransportConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_seconds)
    }
}

/// Configuration for automatic reconnection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts tolerated before giving up
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl ReconnectConfig {
    /// Delay before the next attempt after `failures` consecutive failures
    ///
    /// Starts at `initial_backoff_ms`, doubles per failure, and never exceeds
    /// `max_backoff_ms`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_backoff_ms.max(self.initial_backoff_ms));
        Duration::from_millis(delay)
    }
}

/// Liveness monitoring for one backend service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub service: String,
    /// Another monitored service this one cannot be active without
    #[serde(default)]
    pub depends_on: Option<String>,
    /// Grace period after the announced next heartbeat
    #[serde(default = "default_network_allowance")]
    pub network_allowance_seconds: u64,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_seconds: u64,
    /// Bus channel that carries pushed heartbeat records for this service
    #[serde(default)]
    pub push_channel: Option<String>,
}

impl HeartbeatConfig {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            depends_on: None,
            network_allowance_seconds: default_network_allowance(),
            retry_interval_seconds: default_retry_interval(),
            push_channel: None,
        }
    }
}

fn default_page_url() -> String {
    "http://localhost:8000/dashboard".to_string()
}

fn default_bus_capacity() -> usize {
    crate::bus::DEFAULT_CAPACITY
}

fn default_socket_path() -> String {
    "ws".to_string()
}

fn default_connection_timeout() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    8000
}

fn default_network_allowance() -> u64 {
    0
}

fn default_retry_interval() -> u64 {
    30
}

/// Backend addresses derived from the page URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// WebSocket URL, e.g. `wss://host/app/ws`
    pub socket_url: String,
    /// HTTP application root, e.g. `https://host/app`
    pub http_base: String,
}

impl Endpoints {
    pub fn heartbeat_url(&self, service: &str) -> String {
        format!("{}/admin/heartbeat/{}", self.http_base, service)
    }
}

/// Derive the socket and HTTP endpoints from the page URL
///
/// The application root is the scheme, host, port and first path segment of
/// the page. The socket scheme follows the page scheme (`http` to `ws`,
/// `https` to `wss`).
pub fn derive_endpoints(page_url: &str, socket_path: &str) -> Result<Endpoints> {
    let url = Url::parse(page_url)
        .map_err(|e| FeedError::Config(format!("Invalid page URL {:?}: {}", page_url, e)))?;

    let socket_scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(FeedError::Config(format!(
                "Unsupported page URL scheme {:?}",
                other
            )))
        }
    };

    let host = url
        .host_str()
        .ok_or_else(|| FeedError::Config(format!("Page URL {:?} has no host", page_url)))?;
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    let app_root = url
        .path_segments()
        .and_then(|mut segments| segments.next())
        .filter(|segment| !segment.is_empty())
        .map(|segment| format!("/{}", segment))
        .unwrap_or_default();

    let suffix = socket_path.trim_matches('/');
    let socket_url = if suffix.is_empty() {
        format!("{}://{}{}", socket_scheme, authority, app_root)
    } else {
        format!("{}://{}{}/{}", socket_scheme, authority, app_root, suffix)
    };

    Ok(Endpoints {
        socket_url,
        http_base: format!("{}://{}{}", url.scheme(), authority, app_root),
    })
}

/// Load configuration from a JSON file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        FeedError::Config(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
