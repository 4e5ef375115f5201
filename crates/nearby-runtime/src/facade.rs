//! Command facade
//!
//! [`NearbyConnections`] is the single entry point consumers talk to. Every
//! command resolves to exactly one result; everything that happens afterwards
//! arrives on the event bus. Manager locks are never held across a provider
//! call, so a slow provider cannot stall event delivery.

use std::sync::{Arc, Mutex as StdMutex};

use nearby_core::{
    Activity, AuditEntry, Connection, ConnectionStats, DisconnectOutcome, Endpoint, EndpointId,
    NearbyConfig, NearbyError, OutgoingPayload, PayloadId, PayloadSource, PayloadTransfer,
    Result, TransferStats, TransportProvider,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::EventSubscription;
use crate::shared::Shared;

// ----------------------------------------------------------------------------
// Activity State
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ActivityState {
    /// Name currently advertised, if advertising
    advertising: Option<String>,
    discovering: bool,
}

// ----------------------------------------------------------------------------
// Facade
// ----------------------------------------------------------------------------

/// Handle to a running nearby connections instance
///
/// Owns the provider for its whole lifetime. Construct with
/// [`NearbyBuilder`](crate::NearbyBuilder).
pub struct NearbyConnections<P: TransportProvider> {
    provider: Arc<P>,
    shared: Arc<Shared>,
    /// Serializes start/stop commands; held across the provider call
    activity: Mutex<ActivityState>,
    dispatcher: StdMutex<Option<JoinHandle<()>>>,
}

impl<P: TransportProvider> NearbyConnections<P> {
    pub(crate) fn new(provider: P, shared: Arc<Shared>, dispatcher: JoinHandle<()>) -> Self {
        Self {
            provider: Arc::new(provider),
            shared,
            activity: Mutex::new(ActivityState::default()),
            dispatcher: StdMutex::new(Some(dispatcher)),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &NearbyConfig {
        &self.shared.config
    }

    /// Subscribe to the event stream from this point on
    pub fn subscribe(&self) -> EventSubscription {
        self.shared.bus.subscribe()
    }

    // ------------------------------------------------------------------------
    // Advertising and Discovery
    // ------------------------------------------------------------------------

    /// Start advertising under `local_name`; returns the name being advertised
    ///
    /// While already advertising this is a no-op returning the current name,
    /// or `AlreadyActive` under strict activation.
    pub async fn start_advertising(&self, local_name: &str) -> Result<String> {
        let mut activity = self.activity.lock().await;
        if let Some(current) = &activity.advertising {
            return self.already_active(Activity::Advertising, current.clone());
        }

        self.provider.advertise(local_name).await.map_err(|err| {
            warn!("Failed to start advertising: {}", err);
            NearbyError::from(err)
        })?;

        info!("Advertising as {:?}", local_name);
        activity.advertising = Some(local_name.to_string());
        Ok(local_name.to_string())
    }

    pub async fn stop_advertising(&self) {
        let mut activity = self.activity.lock().await;
        if activity.advertising.take().is_none() {
            return;
        }
        self.provider.stop_advertise().await;
        info!("Advertising stopped");
    }

    /// Start scanning for endpoints
    ///
    /// While already discovering this is a no-op, or `AlreadyActive` under
    /// strict activation.
    pub async fn start_discovery(&self) -> Result<()> {
        let mut activity = self.activity.lock().await;
        if activity.discovering {
            return self.already_active(Activity::Discovery, ());
        }

        // Sightings may arrive before the provider call returns
        self.shared.set_discovering(true);
        if let Err(err) = self.provider.discover().await {
            warn!("Failed to start discovery: {}", err);
            self.shared.set_discovering(false);
            return Err(err.into());
        }

        info!("Discovery started");
        activity.discovering = true;
        Ok(())
    }

    /// Stop scanning and forget every discovered endpoint
    ///
    /// Sightings the provider reports afterwards are dropped. Connections and
    /// transfers already underway are unaffected.
    pub async fn stop_discovery(&self) {
        let mut activity = self.activity.lock().await;
        if !activity.discovering {
            return;
        }
        self.shared.set_discovering(false);
        self.provider.stop_discover().await;
        activity.discovering = false;

        let cleared = self.shared.registry.write().await.clear();
        info!("Discovery stopped, forgot {} endpoint(s)", cleared);
    }

    pub async fn is_advertising(&self) -> bool {
        self.activity.lock().await.advertising.is_some()
    }

    pub async fn is_discovering(&self) -> bool {
        self.activity.lock().await.discovering
    }

    fn already_active<T>(&self, activity: Activity, current: T) -> Result<T> {
        if self.shared.config.strict_activation {
            return Err(NearbyError::AlreadyActive { activity });
        }
        debug!("{} already active, nothing to do", activity);
        Ok(current)
    }

    // ------------------------------------------------------------------------
    // Connection Lifecycle
    // ------------------------------------------------------------------------

    /// Ask `endpoint_id` for a connection
    ///
    /// Succeeds once the provider accepted the request; the outcome arrives
    /// later as `ConnectionResult`.
    pub async fn request_connection(&self, endpoint_id: &EndpointId, local_name: &str) -> Result<()> {
        let shared = &self.shared;

        let peer_name = {
            let registry = shared.registry.read().await;
            if shared.config.require_discovered_endpoint && !registry.contains(endpoint_id) {
                return Err(NearbyError::EndpointUnknown {
                    endpoint_id: endpoint_id.clone(),
                });
            }
            registry.display_name(endpoint_id)
        };

        {
            let mut connections = shared.connections.write().await;
            let initiation = connections.begin_outgoing(endpoint_id, peer_name, shared.now())?;
            if initiation.replaced_terminal {
                shared.forget_transfers(endpoint_id).await;
            }
            shared.bus.publish(initiation.event);
        }

        match self.provider.connect(endpoint_id, local_name).await {
            Ok(()) => {
                info!("Requested connection to {}", endpoint_id);
                Ok(())
            }
            Err(err) => {
                warn!("Connection request to {} failed: {}", endpoint_id, err);
                let mut connections = shared.connections.write().await;
                let events = connections.on_result(
                    endpoint_id,
                    false,
                    Some(err.message().to_string()),
                    shared.now(),
                );
                shared.bus.publish_all(events);
                Err(err.into())
            }
        }
    }

    /// Consent to a pending connection
    ///
    /// Success means the provider took the consent; the connection stays
    /// `Initiated` until the provider reports the result.
    pub async fn accept_connection(&self, endpoint_id: &EndpointId) -> Result<()> {
        self.shared
            .connections
            .write()
            .await
            .begin_accept(endpoint_id)?;

        if let Err(err) = self.provider.accept(endpoint_id).await {
            warn!("Accepting {} failed: {}", endpoint_id, err);
            self.shared
                .connections
                .write()
                .await
                .revert_accept(endpoint_id);
            return Err(err.into());
        }

        info!("Accepted connection from {}", endpoint_id);
        Ok(())
    }

    /// Refuse a pending connection
    ///
    /// The record fails with `LocallyRejected` immediately; the provider is
    /// told in the background.
    pub async fn reject_connection(&self, endpoint_id: &EndpointId) -> Result<()> {
        {
            let mut connections = self.shared.connections.write().await;
            let events = connections.reject(endpoint_id, self.shared.now())?;
            self.shared.bus.publish_all(events);
        }
        info!("Rejected connection with {}", endpoint_id);

        let provider = Arc::clone(&self.provider);
        let endpoint_id = endpoint_id.clone();
        tokio::spawn(async move {
            if let Err(err) = provider.reject(&endpoint_id).await {
                warn!("Provider reject for {} failed: {}", endpoint_id, err);
            }
        });
        Ok(())
    }

    /// Tear down the connection to `endpoint_id`; idempotent
    ///
    /// A terminal record is acknowledged and destroyed along with its
    /// transfers, without an event.
    pub async fn disconnect(&self, endpoint_id: &EndpointId) {
        let shared = &self.shared;
        let now = shared.now();

        {
            let mut connections = shared.connections.write().await;
            match connections.disconnect(endpoint_id, now) {
                DisconnectOutcome::NoConnection => {
                    debug!("Disconnect from {}: no connection", endpoint_id);
                    return;
                }
                DisconnectOutcome::Acknowledged => {
                    shared.forget_transfers(endpoint_id).await;
                    return;
                }
                DisconnectOutcome::Disconnected(events) => {
                    shared.finish_link(endpoint_id, events, now).await;
                }
            }
        }

        self.provider.disconnect(endpoint_id).await;
        info!("Disconnected from {}", endpoint_id);
    }

    // ------------------------------------------------------------------------
    // Payload Transfer
    // ------------------------------------------------------------------------

    /// Start sending `source` to a connected endpoint
    ///
    /// Returns the payload id as soon as the provider took the stream; progress
    /// and the final outcome arrive as `TransferUpdate` events.
    pub async fn send_payload<S>(&self, endpoint_id: &EndpointId, source: &S, name: &str) -> Result<PayloadId>
    where
        S: PayloadSource + ?Sized,
    {
        let shared = &self.shared;
        self.ensure_connected(endpoint_id).await?;

        let total_bytes = source.size().await.map_err(NearbyError::payload_source)?;
        let reader = source.open().await.map_err(NearbyError::payload_source)?;
        let payload_id = PayloadId::generate();

        {
            let connections = shared.connections.read().await;
            if !connections.is_connected(endpoint_id) {
                return Err(NearbyError::NoActiveConnection {
                    endpoint_id: endpoint_id.clone(),
                });
            }
            shared.transfers.write().await.begin_outgoing(
                endpoint_id,
                &payload_id,
                name.to_string(),
                total_bytes,
                shared.now(),
            );
        }

        let payload = OutgoingPayload {
            id: payload_id.clone(),
            name: name.to_string(),
            total_bytes,
            reader,
        };
        if let Err(err) = self.provider.send(endpoint_id, payload).await {
            warn!("Sending {} to {} failed: {}", payload_id, endpoint_id, err);
            shared.transfers.write().await.discard(endpoint_id, &payload_id);
            return Err(err.into());
        }

        info!("Sending {:?} to {} as {}", name, endpoint_id, payload_id);
        Ok(payload_id)
    }

    async fn ensure_connected(&self, endpoint_id: &EndpointId) -> Result<()> {
        if self.shared.connections.read().await.is_connected(endpoint_id) {
            Ok(())
        } else {
            Err(NearbyError::NoActiveConnection {
                endpoint_id: endpoint_id.clone(),
            })
        }
    }

    /// Remove and return every finished transfer
    pub async fn drain_completed_transfers(&self) -> Vec<PayloadTransfer> {
        self.shared.transfers.write().await.drain_completed()
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn endpoints(&self) -> Vec<Endpoint> {
        self.shared.registry.read().await.endpoints()
    }

    pub async fn endpoint(&self, endpoint_id: &EndpointId) -> Option<Endpoint> {
        self.shared.registry.read().await.get(endpoint_id).cloned()
    }

    pub async fn connection(&self, endpoint_id: &EndpointId) -> Option<Connection> {
        self.shared.connections.read().await.get(endpoint_id).cloned()
    }

    pub async fn connections(&self) -> Vec<Connection> {
        self.shared.connections.read().await.connections()
    }

    pub async fn transfer(&self, endpoint_id: &EndpointId, payload_id: &PayloadId) -> Option<PayloadTransfer> {
        self.shared
            .transfers
            .read()
            .await
            .get(endpoint_id, payload_id)
            .cloned()
    }

    pub async fn transfers(&self) -> Vec<PayloadTransfer> {
        self.shared.transfers.read().await.transfers()
    }

    /// Most recent lifecycle transitions, oldest first
    pub async fn recent_transitions(&self, limit: usize) -> Vec<AuditEntry> {
        self.shared.connections.read().await.recent_transitions(limit)
    }

    pub async fn connection_stats(&self) -> ConnectionStats {
        self.shared.connections.read().await.stats().clone()
    }

    pub async fn transfer_stats(&self) -> TransferStats {
        self.shared.transfers.read().await.stats().clone()
    }

    // ------------------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------------------

    /// Stop all activity, disconnect every live connection and stop the dispatcher
    pub async fn shutdown(&self) {
        info!("Shutting down nearby connections");
        self.stop_advertising().await;
        self.stop_discovery().await;

        let live = self.shared.connections.read().await.live_endpoints();
        for endpoint_id in &live {
            self.disconnect(endpoint_id).await;
        }

        if let Some(handle) = self.take_dispatcher() {
            handle.abort();
        }
        info!("Shutdown complete");
    }

    fn take_dispatcher(&self) -> Option<JoinHandle<()>> {
        self.dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

impl<P: TransportProvider> Drop for NearbyConnections<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.take_dispatcher() {
            handle.abort();
        }
    }
}
