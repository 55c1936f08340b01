//! Heartbeat monitor: per-service liveness with dependency gating
//!
//! Each monitor fetches its service's heartbeat once on start and then
//! schedules its own next check: aligned to the service's announced next
//! heartbeat while it is alive, or after a fixed retry interval while it is
//! not. A service can never be active while the service it depends on is
//! not active.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::HeartbeatConfig;
use crate::envelope::Notification;
use crate::error::{FeedError, Result};
use crate::indicator::{HeartbeatStatus, IndicatorView, StatusIndicator};
use crate::io::HttpClient;

/// Latest known heartbeat of one service (fractional epoch seconds)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatRecord {
    pub service: String,
    pub time: f64,
    pub next: f64,
    #[serde(default)]
    pub errors: Value,
    #[serde(default)]
    pub active: bool,
}

/// Body of `GET <base>/admin/heartbeat/<service>`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub channel: String,
    pub curr_time: f64,
    pub next_expected: f64,
    #[serde(default)]
    pub errors: Value,
}

impl HeartbeatResponse {
    pub fn into_record(self) -> HeartbeatRecord {
        HeartbeatRecord {
            service: self.channel,
            time: self.curr_time,
            next: self.next_expected,
            errors: self.errors,
            active: false,
        }
    }
}

/// Outcome of a liveness evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Liveness {
    pub active: bool,
    /// Delay until the next check
    pub next_check: Duration,
}

/// Decide whether a service is alive and when to look again
///
/// Active when `next + allowance > now` and the dependency (if any) is
/// active. An active service is checked again at its announced `next`; if
/// that moment has already passed but the allowance has not, at the end of
/// the allowance window. Anything else is retried after `retry`.
///
/// Times are compared with sub-second precision; the next check is never
/// sooner than one second away.
pub fn evaluate(
    record: &HeartbeatRecord,
    now: f64,
    allowance: Duration,
    retry: Duration,
    dependency_active: bool,
) -> Liveness {
    let allowance = allowance.as_secs_f64();
    let active = record.next + allowance > now && dependency_active;

    if !active {
        return Liveness {
            active,
            next_check: retry,
        };
    }

    let until_next = record.next - now;
    let delay = if until_next > 0.0 {
        until_next
    } else {
        record.next + allowance - now
    };

    Liveness {
        active,
        next_check: Duration::try_from_secs_f64(delay.max(MIN_CHECK_DELAY)).unwrap_or(retry),
    }
}

const MIN_CHECK_DELAY: f64 = 1.0;

/// Handle to a running monitor
#[derive(Debug)]
pub struct HeartbeatHandle {
    service: String,
    status: watch::Receiver<HeartbeatStatus>,
    pushed: mpsc::UnboundedSender<HeartbeatRecord>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn status(&self) -> HeartbeatStatus {
        *self.status.borrow()
    }

    /// Observe status changes; used to gate dependent monitors
    pub fn watch_status(&self) -> watch::Receiver<HeartbeatStatus> {
        self.status.clone()
    }

    /// Hand the monitor a record received out of band
    ///
    /// Returns false once the monitor has stopped.
    pub fn push(&self, record: HeartbeatRecord) -> bool {
        self.pushed.send(record).is_ok()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Stop the monitor and wait for its task to exit
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Heartbeat monitor '{}' task failed: {}", self.service, e);
        }
    }
}

/// Liveness monitor for one service
pub struct HeartbeatMonitor {
    config: HeartbeatConfig,
    url: String,
    http: Arc<dyn HttpClient>,
    indicator: Arc<dyn StatusIndicator>,
    dependency: Option<watch::Receiver<HeartbeatStatus>>,
    push_channel: Option<broadcast::Receiver<Notification>>,
}

impl HeartbeatMonitor {
    pub fn new(
        config: HeartbeatConfig,
        url: impl Into<String>,
        http: Arc<dyn HttpClient>,
        indicator: Arc<dyn StatusIndicator>,
    ) -> Self {
        Self {
            config,
            url: url.into(),
            http,
            indicator,
            dependency: None,
            push_channel: None,
        }
    }

    /// Gate this monitor on another monitor's status
    pub fn depends_on(mut self, dependency: watch::Receiver<HeartbeatStatus>) -> Self {
        self.dependency = Some(dependency);
        self
    }

    /// Accept heartbeat records published on a bus channel
    pub fn with_push_channel(mut self, receiver: broadcast::Receiver<Notification>) -> Self {
        self.push_channel = Some(receiver);
        self
    }

    /// Start the monitor; it runs until the token is cancelled
    pub fn spawn(self, cancel: CancellationToken) -> HeartbeatHandle {
        let (status_tx, status) = watch::channel(HeartbeatStatus::Indeterminate);
        let (pushed, push_rx) = mpsc::unbounded_channel();
        let service = self.config.service.clone();
        let task = tokio::spawn(self.run(status_tx, push_rx, cancel.clone()));

        HeartbeatHandle {
            service,
            status,
            pushed,
            cancel,
            task,
        }
    }

    async fn run(
        mut self,
        status_tx: watch::Sender<HeartbeatStatus>,
        mut push_rx: mpsc::UnboundedReceiver<HeartbeatRecord>,
        cancel: CancellationToken,
    ) {
        let service = self.config.service.clone();
        let retry = Duration::from_secs(self.config.retry_interval_seconds);
        let mut dependency_active = self
            .dependency
            .as_ref()
            .is_none_or(|dep| dep.borrow().is_active());
        let mut record: Option<HeartbeatRecord> = None;
        // the last fetch failed; the stale record must not be re-evaluated
        let mut fetch_failed = false;
        let mut deadline = Instant::now();

        debug!("Heartbeat monitor '{}' started ({})", service, self.url);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => {
                    let fetched = tokio::select! {
                        result = self.fetch() => result,
                        _ = cancel.cancelled() => break,
                    };
                    fetch_failed = fetched.is_err();
                    let delay = match fetched {
                        Ok(fetched) => self.apply(record.insert(fetched), dependency_active, &status_tx),
                        Err(e) => {
                            warn!("Heartbeat fetch for '{}' failed: {}", service, e);
                            self.show_indeterminate(record.as_ref(), retry, &status_tx);
                            retry
                        }
                    };
                    deadline = Instant::now() + delay;
                }
                changed = dependency_changed(&mut self.dependency) => {
                    if changed.is_none() {
                        debug!("Dependency of '{}' stopped reporting", service);
                        self.dependency = None;
                    }
                    let now_active = changed.is_some_and(|status| status.is_active());
                    if now_active != dependency_active {
                        dependency_active = now_active;
                        // re-evaluate now, but never postpone the scheduled fetch
                        if let Some(current) = record.as_mut().filter(|_| !fetch_failed) {
                            let delay = self.apply(current, dependency_active, &status_tx);
                            deadline = deadline.min(Instant::now() + delay);
                        }
                    }
                }
                Some(pushed) = push_rx.recv() => {
                    fetch_failed = false;
                    let delay = self.apply(record.insert(pushed), dependency_active, &status_tx);
                    deadline = Instant::now() + delay;
                }
                pushed = pushed_record(&mut self.push_channel, &service) => match pushed {
                    Some(pushed) => {
                        fetch_failed = false;
                        let delay = self.apply(record.insert(pushed), dependency_active, &status_tx);
                        deadline = Instant::now() + delay;
                    }
                    None => self.push_channel = None,
                },
            }
        }

        debug!("Heartbeat monitor '{}' stopped", service);
    }

    async fn fetch(&self) -> Result<HeartbeatRecord> {
        let response = self.http.get(&self.url).await?;
        if response.status != 200 {
            return Err(FeedError::Http(format!(
                "{} returned status {}",
                self.url, response.status
            )));
        }
        let parsed: HeartbeatResponse = serde_json::from_str(&response.body)?;
        Ok(parsed.into_record())
    }

    /// Evaluate a record, publish the result and return the delay until the next check
    fn apply(
        &self,
        record: &mut HeartbeatRecord,
        dependency_active: bool,
        status_tx: &watch::Sender<HeartbeatStatus>,
    ) -> Duration {
        let now = current_epoch_secs();
        let liveness = evaluate(
            record,
            now,
            Duration::from_secs(self.config.network_allowance_seconds),
            Duration::from_secs(self.config.retry_interval_seconds),
            dependency_active,
        );
        record.active = liveness.active;

        let status = if liveness.active {
            HeartbeatStatus::Active
        } else {
            HeartbeatStatus::Stopped
        };
        publish(status_tx, status);

        let next_check = now + liveness.next_check.as_secs_f64();
        let view = IndicatorView::new(status, Some(record.time as i64), next_check as i64);
        self.indicator.show(&self.config.service, &view);

        debug!(
            "Heartbeat '{}': {} (next {}, check in {:?})",
            self.config.service, status, record.next, liveness.next_check
        );
        liveness.next_check
    }

    fn show_indeterminate(
        &self,
        record: Option<&HeartbeatRecord>,
        retry: Duration,
        status_tx: &watch::Sender<HeartbeatStatus>,
    ) {
        publish(status_tx, HeartbeatStatus::Indeterminate);
        let next_check = current_epoch_secs() + retry.as_secs_f64();
        let view = IndicatorView::new(
            HeartbeatStatus::Indeterminate,
            record.map(|r| r.time as i64),
            next_check as i64,
        );
        self.indicator.show(&self.config.service, &view);
    }
}

/// Publish a status; dependents are only woken when it actually changes
fn publish(status_tx: &watch::Sender<HeartbeatStatus>, status: HeartbeatStatus) {
    status_tx.send_if_modified(|current| {
        let changed = *current != status;
        *current = status;
        changed
    });
}

/// Next dependency status; `None` once the dependency's monitor is gone
async fn dependency_changed(
    dependency: &mut Option<watch::Receiver<HeartbeatStatus>>,
) -> Option<HeartbeatStatus> {
    match dependency {
        Some(receiver) => match receiver.changed().await {
            Ok(()) => Some(*receiver.borrow_and_update()),
            Err(_) => None,
        },
        None => std::future::pending().await,
    }
}

/// Next pushed record for `service`; `None` once the channel is closed
async fn pushed_record(
    channel: &mut Option<broadcast::Receiver<Notification>>,
    service: &str,
) -> Option<HeartbeatRecord> {
    let Some(receiver) = channel else {
        return std::future::pending().await;
    };

    loop {
        match receiver.recv().await {
            Ok(notification) => {
                let Some(data) = notification.data() else {
                    continue;
                };
                match serde_json::from_value::<HeartbeatResponse>(data.clone()) {
                    Ok(response) if response.channel == service => {
                        return Some(response.into_record())
                    }
                    Ok(_) => {}
                    Err(e) => debug!("Ignoring pushed heartbeat for '{}': {}", service, e),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!("Pushed heartbeats for '{}' lagged by {}", service, skipped);
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

/// Wall-clock time in fractional epoch seconds
pub fn current_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
