//! Subscriptions and the requests sent to the backend
//!
//! A page subscribes to one or more logical channels. Each subscription
//! produces an immutable [`SubscriptionRequest`] that is re-sent verbatim,
//! with the session's client id attached, whenever a session is established.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Event name used for historical status notifications
pub const HISTORICAL_STATUS: &str = "historicalStatus";

/// Wire value of `messageType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    #[serde(rename = "service")]
    Service,
    #[serde(rename = "historicalStatus")]
    HistoricalStatus,
}

/// A logical channel the page wants to receive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Subscription {
    /// Data for one page, e.g. a camera table or a night report
    Service {
        page_type: String,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        camera: Option<String>,
        #[serde(default)]
        channel: Option<String>,
    },
    /// Whether the backend is still loading historical data
    HistoricalStatus,
}

impl Subscription {
    /// Convenience constructor for a service subscription
    pub fn service(
        page_type: impl Into<String>,
        location: Option<&str>,
        camera: Option<&str>,
        channel: Option<&str>,
    ) -> Self {
        Subscription::Service {
            page_type: page_type.into(),
            location: location.map(str::to_string),
            camera: camera.map(str::to_string),
            channel: channel.map(str::to_string),
        }
    }

    /// Name of the bus channel this subscription's notifications are published on
    pub fn event_name(&self) -> &str {
        match self {
            Subscription::Service { page_type, .. } => page_type,
            Subscription::HistoricalStatus => HISTORICAL_STATUS,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Subscription::Service { .. } => MessageType::Service,
            Subscription::HistoricalStatus => MessageType::HistoricalStatus,
        }
    }

    pub fn is_status(&self) -> bool {
        matches!(self, Subscription::HistoricalStatus)
    }

    /// Slash-joined location/camera/channel, skipping absent or empty parts
    pub fn page_id(&self) -> Option<String> {
        match self {
            Subscription::Service {
                location,
                camera,
                channel,
                ..
            } => Some(page_id([
                location.as_deref(),
                camera.as_deref(),
                channel.as_deref(),
            ])),
            Subscription::HistoricalStatus => None,
        }
    }

    /// Build the request for this subscription under a session identity
    pub fn request(&self, client_id: Uuid) -> SubscriptionRequest {
        let message = match self {
            Subscription::Service { page_type, .. } => {
                let page_id = self.page_id().unwrap_or_default();
                Some(format!("{} {}", page_type, page_id))
            }
            Subscription::HistoricalStatus => None,
        };

        SubscriptionRequest {
            message_type: self.message_type(),
            message,
            client_id,
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subscription::Service { page_type, .. } => {
                write!(f, "{} {}", page_type, self.page_id().unwrap_or_default())
            }
            Subscription::HistoricalStatus => write!(f, "{}", HISTORICAL_STATUS),
        }
    }
}

/// Join page id parts with `/`, dropping absent and empty parts
pub fn page_id<'a>(parts: impl IntoIterator<Item = Option<&'a str>>) -> String {
    parts
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Request sent by the client to register a subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRequest {
    pub message_type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "clientID")]
    pub client_id: Uuid,
}

impl SubscriptionRequest {
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
