//! Event router: classifies inbound frames and publishes notifications

use crate::bus::EventBus;
use crate::envelope::Envelope;
use crate::subscription::Subscription;

/// An event name bound at subscription time
#[derive(Debug, Clone, PartialEq, Eq)]
struct Binding {
    event_name: String,
    status: bool,
}

/// Turns raw frames into notifications on the bus
///
/// Every valid envelope produces exactly one notification, published in
/// arrival order. Frames that are not envelopes are dropped without error.
#[derive(Debug, Clone)]
pub struct Router {
    bus: EventBus,
    bindings: Vec<Binding>,
}

impl Router {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            bindings: Vec::new(),
        }
    }

    /// Bind the event name of a subscription
    pub fn bind(&mut self, subscription: &Subscription) {
        let binding = Binding {
            event_name: subscription.event_name().to_string(),
            status: subscription.is_status(),
        };
        if !self.bindings.contains(&binding) {
            tracing::debug!("Router bound to '{}'", binding.event_name);
            self.bindings.push(binding);
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn event_names(&self) -> Vec<&str> {
        self.bindings.iter().map(|b| b.event_name.as_str()).collect()
    }

    /// Pick the channel an envelope of the given `dataType` is published on
    ///
    /// Status channels claim envelopes whose `dataType` names them. All other
    /// envelopes go to the first service subscription, or to the first
    /// binding when the page has no service subscription.
    pub fn channel_for(&self, data_type: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|b| b.status && b.event_name == data_type)
            .or_else(|| self.bindings.iter().find(|b| !b.status))
            .or_else(|| self.bindings.first())
            .map(|b| b.event_name.as_str())
    }

    /// Route one raw frame, returning whether a notification was published
    pub async fn route(&self, raw: &str) -> bool {
        let Some(envelope) = Envelope::parse(raw) else {
            tracing::debug!("Dropping non-envelope frame ({} bytes)", raw.len());
            return false;
        };

        let Some(channel) = self.channel_for(&envelope.data_type) else {
            tracing::debug!(
                "Dropping '{}' envelope: no subscription bound",
                envelope.data_type
            );
            return false;
        };

        let notification = envelope.into_notification();
        let delivered = self.bus.publish(channel, notification).await;
        tracing::debug!("Published on '{}' to {} listener(s)", channel, delivered);
        true
    }
}
