//! State shared by the command facade and the notification dispatcher
//!
//! Each manager sits behind its own lock. When both the connection manager and
//! the transfer tracker are needed, the connection lock is taken first. Events
//! are published while the lock that produced them is still held, so events
//! about one endpoint leave in the order their mutations happened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nearby_core::{
    ConnectionManager, EndpointId, EndpointRegistry, EventBatch, NearbyConfig, TimeSource,
    Timestamp, TransferTracker,
};
use tokio::sync::RwLock;
use tracing::debug;

use crate::bus::EventBus;

pub(crate) struct Shared {
    pub(crate) registry: RwLock<EndpointRegistry>,
    pub(crate) connections: RwLock<ConnectionManager>,
    pub(crate) transfers: RwLock<TransferTracker>,
    pub(crate) bus: EventBus,
    /// Set while a discovery session is running; sightings outside one are dropped
    discovering: AtomicBool,
    pub(crate) clock: Arc<dyn TimeSource>,
    pub(crate) config: NearbyConfig,
}

impl Shared {
    pub(crate) fn new(config: NearbyConfig, clock: Arc<dyn TimeSource>) -> Self {
        Self {
            registry: RwLock::new(EndpointRegistry::new()),
            connections: RwLock::new(ConnectionManager::new(config.audit_trail_limit)),
            transfers: RwLock::new(TransferTracker::new()),
            bus: EventBus::new(config.event_buffer_size),
            discovering: AtomicBool::new(false),
            clock,
            config,
        }
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub(crate) fn is_discovering(&self) -> bool {
        self.discovering.load(Ordering::Acquire)
    }

    pub(crate) fn set_discovering(&self, discovering: bool) {
        self.discovering.store(discovering, Ordering::Release);
    }

    /// Publish the events of a link that reached `Disconnected`, then fail
    /// whatever was still in flight on it
    ///
    /// Must be called with the connection lock held by the caller.
    pub(crate) async fn finish_link(&self, endpoint_id: &EndpointId, events: EventBatch, now: Timestamp) {
        if events.is_empty() {
            return;
        }
        self.bus.publish_all(events);

        let failed = self.transfers.write().await.fail_in_flight(endpoint_id, now);
        self.bus.publish_all(failed);
    }

    /// Drop transfers belonging to a connection record that no longer exists
    pub(crate) async fn forget_transfers(&self, endpoint_id: &EndpointId) {
        let removed = self.transfers.write().await.remove_endpoint(endpoint_id);
        if removed > 0 {
            debug!("Dropped {} transfer(s) for {}", removed, endpoint_id);
        }
    }
}
