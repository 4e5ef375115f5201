//! Event bus
//!
//! A broadcast channel carrying [`NearbyEvent`]s to every subscriber. Publishing
//! never blocks; a subscriber that falls more than the configured capacity
//! behind skips the oldest events and keeps going.

use nearby_core::NearbyEvent;
use tokio::sync::broadcast;
use tracing::{trace, warn};

// ----------------------------------------------------------------------------
// Bus
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NearbyEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Deliver an event to every current subscriber
    pub fn publish(&self, event: NearbyEvent) {
        trace!("Publishing {} for {}", event.kind(), event.endpoint_id());
        // No subscribers is not an error
        let _ = self.sender.send(event);
    }

    pub fn publish_all(&self, events: impl IntoIterator<Item = NearbyEvent>) {
        for event in events {
            self.publish(event);
        }
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            receiver: self.sender.subscribe(),
            skipped: 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

// ----------------------------------------------------------------------------
// Subscription
// ----------------------------------------------------------------------------

/// One consumer's view of the event stream
#[derive(Debug)]
pub struct EventSubscription {
    receiver: broadcast::Receiver<NearbyEvent>,
    skipped: u64,
}

impl EventSubscription {
    /// Next event, or `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<NearbyEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(count)) => self.lagged(count),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next event if one is already buffered
    pub fn try_recv(&mut self) -> Option<NearbyEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(count)) => self.lagged(count),
                Err(_) => return None,
            }
        }
    }

    /// Events this subscriber missed by lagging
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn lagged(&mut self, count: u64) {
        warn!("Event subscriber lagged, skipped {} events", count);
        self.skipped += count;
    }
}
