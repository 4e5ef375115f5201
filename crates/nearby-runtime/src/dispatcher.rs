//! Notification dispatcher task
//!
//! Drains the provider's notification stream, routes each notification to the
//! manager that owns it and publishes the resulting events. The same task
//! periodically sweeps terminal connection records past their retention.

use std::sync::Arc;

use nearby_core::{NotificationStream, PayloadProgress, ProviderNotification, RemoteInitiation};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::shared::Shared;

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    notifications: NotificationStream,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<Shared>, notifications: NotificationStream) -> Self {
        Self {
            shared,
            notifications,
        }
    }

    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        info!("Notification dispatcher starting");

        let mut sweep = interval(self.shared.config.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                notification = self.notifications.recv() => match notification {
                    Some(notification) => self.handle(notification).await,
                    None => {
                        info!("Provider notification stream closed");
                        break;
                    }
                },

                _ = sweep.tick() => {
                    self.sweep_expired().await;
                }
            }
        }

        info!("Notification dispatcher stopped");
    }

    async fn handle(&self, notification: ProviderNotification) {
        let shared = &self.shared;
        let now = shared.now();

        match notification {
            ProviderNotification::EndpointFound { endpoint_id, name } => {
                let mut registry = shared.registry.write().await;
                // Checked under the registry lock so a concurrent stop clears after us
                if !shared.is_discovering() {
                    debug!("Dropping sighting of {} outside a discovery session", endpoint_id);
                    return;
                }
                if let Some(event) = registry.upsert(endpoint_id, name, now) {
                    shared.bus.publish(event);
                }
            }

            ProviderNotification::EndpointLost { endpoint_id } => {
                let mut registry = shared.registry.write().await;
                if let Some(event) = registry.remove(&endpoint_id) {
                    shared.bus.publish(event);
                }
            }

            ProviderNotification::ConnectionInitiated {
                endpoint_id,
                peer_name,
            } => {
                let mut connections = shared.connections.write().await;
                if let RemoteInitiation::Started(initiation) =
                    connections.on_remote_initiated(&endpoint_id, peer_name, now)
                {
                    if initiation.replaced_terminal {
                        shared.forget_transfers(&endpoint_id).await;
                    }
                    shared.bus.publish(initiation.event);
                }
            }

            ProviderNotification::ConnectionResult {
                endpoint_id,
                success,
                reason,
            } => {
                let mut connections = shared.connections.write().await;
                let events = connections.on_result(&endpoint_id, success, reason, now);
                shared.bus.publish_all(events);
            }

            ProviderNotification::Disconnected { endpoint_id } => {
                let mut connections = shared.connections.write().await;
                let events = connections.on_link_lost(&endpoint_id, now);
                shared.finish_link(&endpoint_id, events, now).await;
            }

            ProviderNotification::PayloadProgress(progress) => {
                self.handle_progress(progress).await;
            }
        }
    }

    async fn handle_progress(&self, progress: PayloadProgress) {
        let shared = &self.shared;

        // Held across the update so the link cannot end between check and apply
        let connections = shared.connections.read().await;
        let connected = connections.is_connected(&progress.endpoint_id);

        let mut transfers = shared.transfers.write().await;
        if let Some(event) = transfers.apply_progress(&progress, connected, shared.now()) {
            shared.bus.publish(event);
        }
    }

    async fn sweep_expired(&self) {
        let shared = &self.shared;
        let mut connections = shared.connections.write().await;
        let expired = connections.sweep_expired(shared.now(), shared.config.terminal_retention);

        for endpoint_id in &expired {
            shared.forget_transfers(endpoint_id).await;
        }
        if !expired.is_empty() {
            debug!("Swept {} expired connection record(s)", expired.len());
        }
    }
}
