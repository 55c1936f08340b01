//! Status indicators driven by heartbeat monitors

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Displayed liveness of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatStatus {
    Active,
    Stopped,
    /// No usable heartbeat yet, or the last fetch failed
    #[default]
    Indeterminate,
}

impl HeartbeatStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, HeartbeatStatus::Active)
    }
}

impl fmt::Display for HeartbeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeartbeatStatus::Active => write!(f, "Active"),
            HeartbeatStatus::Stopped => write!(f, "Stopped"),
            HeartbeatStatus::Indeterminate => write!(f, "Indeterminate"),
        }
    }
}

/// What an indicator should display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorView {
    pub status: HeartbeatStatus,
    pub tooltip: String,
}

impl IndicatorView {
    /// Build a view from the last heartbeat time and the next scheduled check
    pub fn new(status: HeartbeatStatus, last_heartbeat: Option<i64>, next_check: i64) -> Self {
        Self {
            status,
            tooltip: tooltip(last_heartbeat, next_check, !status.is_active()),
        }
    }
}

/// Human-readable tooltip with UTC timestamps
///
/// `Last heartbeat: <UTC>\nNext check: <UTC>`, followed by `\nRetrying`
/// while the service is not active.
pub fn tooltip(last_heartbeat: Option<i64>, next_check: i64, retrying: bool) -> String {
    let last = last_heartbeat
        .map(format_utc)
        .unwrap_or_else(|| "never".to_string());
    let mut text = format!("Last heartbeat: {}\nNext check: {}", last, format_utc(next_check));
    if retrying {
        text.push_str("\nRetrying");
    }
    text
}

fn format_utc(epoch_secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(epoch_secs, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("@{}", epoch_secs))
}

/// Receives indicator updates for a service
#[cfg_attr(test, mockall::automock)]
pub trait StatusIndicator: Send + Sync {
    fn show(&self, service: &str, view: &IndicatorView);
}

/// Indicator that reports through tracing
///
/// Status changes are logged at info, repeated updates at debug.
#[derive(Debug, Default)]
pub struct TracingIndicator {
    last: Mutex<HashMap<String, HeartbeatStatus>>,
}

impl TracingIndicator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusIndicator for TracingIndicator {
    fn show(&self, service: &str, view: &IndicatorView) {
        let previous = match self.last.lock() {
            Ok(mut last) => last.insert(service.to_string(), view.status),
            Err(_) => None,
        };

        if previous == Some(view.status) {
            tracing::debug!(
                "Heartbeat '{}': {} ({})",
                service,
                view.status,
                view.tooltip.replace('\n', "; ")
            );
        } else {
            tracing::info!(
                "Heartbeat '{}' is now {} ({})",
                service,
                view.status,
                view.tooltip.replace('\n', "; ")
            );
        }
    }
}
