//! Publish/subscribe registry keyed by channel name
//!
//! Owned by a page session: created when the page starts and closed when it
//! is torn down. Views attach by subscribing to a channel and detach by
//! dropping their receiver. The bus knows nothing about its listeners.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};

use crate::envelope::Notification;

/// Default per-channel buffer
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct EventBus {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<Notification>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Attach a listener to a channel, creating the channel if needed
    pub async fn subscribe(&self, channel: &str) -> broadcast::Receiver<Notification> {
        if let Some(sender) = self.channels.read().await.get(channel) {
            return sender.subscribe();
        }

        let mut channels = self.channels.write().await;
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publish a notification, returning how many listeners received it
    ///
    /// A channel without listeners is not an error; the notification is
    /// simply not delivered to anyone.
    pub async fn publish(&self, channel: &str, notification: Notification) -> usize {
        let channels = self.channels.read().await;
        match channels.get(channel) {
            Some(sender) => sender.send(notification).unwrap_or(0),
            None => {
                tracing::debug!("No listeners on '{}'", channel);
                0
            }
        }
    }

    /// Number of listeners currently attached to a channel
    pub async fn listener_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map_or(0, |sender| sender.receiver_count())
    }

    /// Drop every channel; listeners observe end of stream
    pub async fn close(&self) {
        let mut channels = self.channels.write().await;
        tracing::debug!("Closing event bus ({} channels)", channels.len());
        channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::NotificationBody;
    use serde_json::json;

    fn notification(n: u64) -> Notification {
        Notification {
            datestamp: None,
            body: NotificationBody::Data(json!(n)),
            data_type: "metadata".to_string(),
        }
    }

    #[tokio::test]
    async fn every_listener_receives_each_notification_in_order() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe("camera").await;
        let mut second = bus.subscribe("camera").await;

        for n in 0..3 {
            assert_eq!(bus.publish("camera", notification(n)).await, 2);
        }

        for n in 0..3 {
            assert_eq!(first.recv().await.unwrap(), notification(n));
            assert_eq!(second.recv().await.unwrap(), notification(n));
        }
    }

    #[tokio::test]
    async fn channels_are_independent() {
        let bus = EventBus::default();
        let mut camera = bus.subscribe("camera").await;
        let mut calendar = bus.subscribe("calendar").await;

        bus.publish("calendar", notification(1)).await;

        assert_eq!(calendar.recv().await.unwrap(), notification(1));
        assert!(matches!(
            camera.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));
    }

    #[tokio::test]
    async fn publish_without_listeners_is_harmless() {
        let bus = EventBus::default();
        assert_eq!(bus.publish("nobody", notification(1)).await, 0);

        let receiver = bus.subscribe("camera").await;
        drop(receiver);
        assert_eq!(bus.publish("camera", notification(1)).await, 0);
    }

    #[tokio::test]
    async fn listener_count_tracks_detach() {
        let bus = EventBus::default();
        let a = bus.subscribe("camera").await;
        let _b = bus.subscribe("camera").await;
        assert_eq!(bus.listener_count("camera").await, 2);
        drop(a);
        assert_eq!(bus.listener_count("camera").await, 1);
        assert_eq!(bus.listener_count("other").await, 0);
    }

    #[tokio::test]
    async fn close_ends_listener_streams() {
        let bus = EventBus::default();
        let mut receiver = bus.subscribe("camera").await;
        bus.close().await;
        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
