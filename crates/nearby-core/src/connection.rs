//! Connection Lifecycle State Machine
//!
//! One [`Connection`] record per endpoint walks the graph
//!
//! ```text
//!            +--> Connected --+--> Disconnected
//! Initiated -+                |
//!            +--> Failed      +--- (from Initiated as well)
//! ```
//!
//! `Failed` and `Disconnected` are terminal. A terminal record is kept for
//! inspection until it is acknowledged by `disconnect`, replaced by a new
//! initiation, or swept after the retention window. Notifications that target
//! a terminal record are dropped so destroyed state is never resurrected.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use tracing::{debug, info, warn};

use crate::errors::{NearbyError, Result};
use crate::event::{EventBatch, NearbyEvent};
use crate::types::{Direction, EndpointId, Timestamp};

// ----------------------------------------------------------------------------
// Connection State Types
// ----------------------------------------------------------------------------

/// Lifecycle state of a connection record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Negotiation in progress
    Initiated,
    /// Link established
    Connected,
    /// Negotiation failed or was rejected
    Failed,
    /// Link torn down
    Disconnected,
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Initiated => "Initiated",
            ConnectionState::Connected => "Connected",
            ConnectionState::Failed => "Failed",
            ConnectionState::Disconnected => "Disconnected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Failed | ConnectionState::Disconnected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Local side's decision on a pending connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Consent {
    Pending,
    /// Accept was issued; the record stays `Initiated` until the result arrives
    Accepted,
    Rejected,
}

/// Why a connection ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// Local `reject` before resolution
    LocallyRejected,
    /// Provider status message, passed through unchanged
    Transport(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::LocallyRejected => write!(f, "locally rejected"),
            FailureReason::Transport(reason) => write!(f, "{}", reason),
        }
    }
}

// ----------------------------------------------------------------------------
// State Transition Events
// ----------------------------------------------------------------------------

/// Inputs that move a record between states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Provider resolved the negotiation
    ResultReported {
        success: bool,
        reason: Option<String>,
    },
    /// Local side refused before resolution
    LocalReject,
    /// Either side tore the link down
    Disconnect,
}

impl LifecycleEvent {
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::ResultReported { success: true, .. } => "ResultSuccess",
            LifecycleEvent::ResultReported { success: false, .. } => "ResultFailure",
            LifecycleEvent::LocalReject => "LocalReject",
            LifecycleEvent::Disconnect => "Disconnect",
        }
    }
}

/// Errors that can occur during state transitions
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("Event {event} not valid for state {from}")]
    InvalidTransition {
        from: ConnectionState,
        event: &'static str,
    },
}

// ----------------------------------------------------------------------------
// Connection Record
// ----------------------------------------------------------------------------

/// Negotiated relationship with one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub endpoint_id: EndpointId,
    pub direction: Direction,
    pub state: ConnectionState,
    pub consent: Consent,
    /// Name the peer reported during initiation, if any
    pub peer_name: Option<String>,
    /// Present only in `Failed`
    pub failure_reason: Option<FailureReason>,
    pub initiated_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Result of a state transition
#[derive(Debug, Clone)]
pub struct Transition {
    pub connection: Connection,
    pub events: EventBatch,
    pub audit_entry: AuditEntry,
}

/// Audit trail entry for state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: Timestamp,
    pub endpoint_id: EndpointId,
    pub from_state: ConnectionState,
    pub to_state: ConnectionState,
    pub event: String,
}

impl Connection {
    fn initiated(
        endpoint_id: EndpointId,
        direction: Direction,
        peer_name: Option<String>,
        now: Timestamp,
    ) -> Self {
        Self {
            endpoint_id,
            direction,
            state: ConnectionState::Initiated,
            consent: Consent::Pending,
            peer_name,
            failure_reason: None,
            initiated_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    fn initiated_event(&self) -> NearbyEvent {
        NearbyEvent::ConnectionInitiated {
            endpoint_id: self.endpoint_id.clone(),
            peer_name: self.peer_name.clone(),
            direction: self.direction,
        }
    }

    /// Compute the record after `event`; the receiver is left untouched
    pub fn transition(
        &self,
        event: LifecycleEvent,
        now: Timestamp,
    ) -> core::result::Result<Transition, TransitionError> {
        let from_state = self.state;
        let event_name = event.name();
        let mut next = self.clone();
        next.updated_at = now;

        let events: EventBatch = match (self.state, event) {
            (ConnectionState::Initiated, LifecycleEvent::ResultReported { success: true, .. }) => {
                next.state = ConnectionState::Connected;
                smallvec![NearbyEvent::ConnectionResult {
                    endpoint_id: self.endpoint_id.clone(),
                    success: true,
                    reason: None,
                }]
            }

            (ConnectionState::Initiated, LifecycleEvent::ResultReported { success: false, reason }) => {
                let reason = FailureReason::Transport(
                    reason.unwrap_or_else(|| "connection failed".to_string()),
                );
                next.state = ConnectionState::Failed;
                next.failure_reason = Some(reason.clone());
                smallvec![NearbyEvent::ConnectionResult {
                    endpoint_id: self.endpoint_id.clone(),
                    success: false,
                    reason: Some(reason),
                }]
            }

            (ConnectionState::Initiated, LifecycleEvent::LocalReject) => {
                next.state = ConnectionState::Failed;
                next.consent = Consent::Rejected;
                next.failure_reason = Some(FailureReason::LocallyRejected);
                smallvec![NearbyEvent::ConnectionResult {
                    endpoint_id: self.endpoint_id.clone(),
                    success: false,
                    reason: Some(FailureReason::LocallyRejected),
                }]
            }

            (
                ConnectionState::Initiated | ConnectionState::Connected,
                LifecycleEvent::Disconnect,
            ) => {
                next.state = ConnectionState::Disconnected;
                smallvec![NearbyEvent::Disconnected {
                    endpoint_id: self.endpoint_id.clone(),
                }]
            }

            (from, _) => {
                return Err(TransitionError::InvalidTransition {
                    from,
                    event: event_name,
                });
            }
        };

        let audit_entry = AuditEntry {
            timestamp: now,
            endpoint_id: self.endpoint_id.clone(),
            from_state,
            to_state: next.state,
            event: event_name.to_string(),
        };

        Ok(Transition {
            connection: next,
            events,
            audit_entry,
        })
    }
}

// ----------------------------------------------------------------------------
// Manager Outcomes
// ----------------------------------------------------------------------------

/// A new record entered `Initiated`
#[derive(Debug, Clone, PartialEq)]
pub struct Initiation {
    pub event: NearbyEvent,
    /// A terminal record for the same endpoint was replaced; its transfers are stale
    pub replaced_terminal: bool,
}

/// What a provider initiation notification did
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteInitiation {
    /// New incoming record
    Started(Initiation),
    /// Confirmed our own outgoing request
    Confirmed,
    /// A live record already exists; notification dropped
    Duplicate,
}

/// What a local disconnect did
#[derive(Debug, Clone, PartialEq)]
pub enum DisconnectOutcome {
    /// Nothing to do
    NoConnection,
    /// Terminal record acknowledged and destroyed
    Acknowledged,
    /// Live record moved to `Disconnected`
    Disconnected(EventBatch),
}

// ----------------------------------------------------------------------------
// Connection Manager
// ----------------------------------------------------------------------------

/// Manages connection records for all endpoints
#[derive(Debug)]
pub struct ConnectionManager {
    connections: HashMap<EndpointId, Connection>,
    audit_trail: VecDeque<AuditEntry>,
    audit_limit: usize,
    stats: ConnectionStats,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl ConnectionManager {
    pub fn new(audit_limit: usize) -> Self {
        Self {
            connections: HashMap::new(),
            audit_trail: VecDeque::new(),
            audit_limit,
            stats: ConnectionStats::default(),
        }
    }

    pub fn get(&self, endpoint_id: &EndpointId) -> Option<&Connection> {
        self.connections.get(endpoint_id)
    }

    pub fn state(&self, endpoint_id: &EndpointId) -> Option<ConnectionState> {
        self.connections.get(endpoint_id).map(|c| c.state)
    }

    pub fn is_connected(&self, endpoint_id: &EndpointId) -> bool {
        self.connections
            .get(endpoint_id)
            .is_some_and(Connection::is_connected)
    }

    /// Snapshot of every record, ordered by endpoint id
    pub fn connections(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> = self.connections.values().cloned().collect();
        connections.sort_by(|a, b| a.endpoint_id.cmp(&b.endpoint_id));
        connections
    }

    /// Endpoints whose record is not terminal
    pub fn live_endpoints(&self) -> Vec<EndpointId> {
        let mut live: Vec<EndpointId> = self
            .connections
            .values()
            .filter(|c| !c.is_terminal())
            .map(|c| c.endpoint_id.clone())
            .collect();
        live.sort();
        live
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    /// Most recent transitions, oldest first
    pub fn recent_transitions(&self, limit: usize) -> Vec<AuditEntry> {
        let start = self.audit_trail.len().saturating_sub(limit);
        self.audit_trail.iter().skip(start).cloned().collect()
    }

    /// Local `requestConnection`: create an outgoing `Initiated` record
    pub fn begin_outgoing(
        &mut self,
        endpoint_id: &EndpointId,
        peer_name: Option<String>,
        now: Timestamp,
    ) -> Result<Initiation> {
        if self.has_live_record(endpoint_id) {
            return Err(NearbyError::DuplicateConnectionAttempt {
                endpoint_id: endpoint_id.clone(),
            });
        }
        Ok(self.insert_initiated(endpoint_id, Direction::Outgoing, peer_name, now))
    }

    /// Provider reported an initiation for `endpoint_id`
    pub fn on_remote_initiated(
        &mut self,
        endpoint_id: &EndpointId,
        peer_name: String,
        now: Timestamp,
    ) -> RemoteInitiation {
        if let Some(existing) = self.connections.get_mut(endpoint_id) {
            if existing.state == ConnectionState::Initiated
                && existing.direction == Direction::Outgoing
            {
                debug!("Provider confirmed outgoing request to {}", endpoint_id);
                existing.peer_name = Some(peer_name);
                existing.updated_at = now;
                return RemoteInitiation::Confirmed;
            }
            if !existing.is_terminal() {
                warn!(
                    "Dropping duplicate initiation for {} in state {}",
                    endpoint_id, existing.state
                );
                self.stats.stale_notifications_dropped += 1;
                return RemoteInitiation::Duplicate;
            }
        }
        RemoteInitiation::Started(self.insert_initiated(
            endpoint_id,
            Direction::Incoming,
            Some(peer_name),
            now,
        ))
    }

    /// Mark local consent ahead of the provider's accept call
    pub fn begin_accept(&mut self, endpoint_id: &EndpointId) -> Result<()> {
        match self.connections.get_mut(endpoint_id) {
            Some(connection)
                if connection.state == ConnectionState::Initiated
                    && connection.consent == Consent::Pending =>
            {
                connection.consent = Consent::Accepted;
                Ok(())
            }
            other => Err(NearbyError::invalid_state(
                endpoint_id,
                "accept",
                other.map(|c| c.state),
            )),
        }
    }

    /// Undo `begin_accept` after the provider refused the accept call
    pub fn revert_accept(&mut self, endpoint_id: &EndpointId) {
        if let Some(connection) = self.connections.get_mut(endpoint_id) {
            if connection.state == ConnectionState::Initiated
                && connection.consent == Consent::Accepted
            {
                connection.consent = Consent::Pending;
            }
        }
    }

    /// Local `rejectConnection`: fail the record immediately
    pub fn reject(&mut self, endpoint_id: &EndpointId, now: Timestamp) -> Result<EventBatch> {
        let state = self.state(endpoint_id);
        if state != Some(ConnectionState::Initiated) {
            return Err(NearbyError::invalid_state(endpoint_id, "reject", state));
        }
        self.apply(endpoint_id, LifecycleEvent::LocalReject, now)
            .map_err(|_| NearbyError::invalid_state(endpoint_id, "reject", state))
    }

    /// Provider resolved a negotiation; stale results yield no events
    pub fn on_result(
        &mut self,
        endpoint_id: &EndpointId,
        success: bool,
        reason: Option<String>,
        now: Timestamp,
    ) -> EventBatch {
        self.apply_notification(
            endpoint_id,
            LifecycleEvent::ResultReported { success, reason },
            now,
        )
    }

    /// Provider reported link loss; stale reports yield no events
    pub fn on_link_lost(&mut self, endpoint_id: &EndpointId, now: Timestamp) -> EventBatch {
        self.apply_notification(endpoint_id, LifecycleEvent::Disconnect, now)
    }

    /// Local `disconnect`, idempotent
    pub fn disconnect(&mut self, endpoint_id: &EndpointId, now: Timestamp) -> DisconnectOutcome {
        match self.state(endpoint_id) {
            None => DisconnectOutcome::NoConnection,
            Some(state) if state.is_terminal() => {
                debug!(
                    "Acknowledged terminal connection to {} ({})",
                    endpoint_id, state
                );
                self.connections.remove(endpoint_id);
                self.stats.records_destroyed += 1;
                DisconnectOutcome::Acknowledged
            }
            Some(_) => match self.apply(endpoint_id, LifecycleEvent::Disconnect, now) {
                Ok(events) => DisconnectOutcome::Disconnected(events),
                Err(_) => DisconnectOutcome::NoConnection,
            },
        }
    }

    /// Destroy terminal records older than `retention`; returns their endpoints
    pub fn sweep_expired(&mut self, now: Timestamp, retention: Duration) -> Vec<EndpointId> {
        let expired: Vec<EndpointId> = self
            .connections
            .values()
            .filter(|c| c.is_terminal() && now.duration_since(c.updated_at) >= retention)
            .map(|c| c.endpoint_id.clone())
            .collect();

        for endpoint_id in &expired {
            debug!("Retention expired for connection to {}", endpoint_id);
            self.connections.remove(endpoint_id);
            self.stats.records_destroyed += 1;
        }
        expired
    }

    fn has_live_record(&self, endpoint_id: &EndpointId) -> bool {
        self.connections
            .get(endpoint_id)
            .is_some_and(|c| !c.is_terminal())
    }

    fn insert_initiated(
        &mut self,
        endpoint_id: &EndpointId,
        direction: Direction,
        peer_name: Option<String>,
        now: Timestamp,
    ) -> Initiation {
        let connection = Connection::initiated(endpoint_id.clone(), direction, peer_name, now);
        let event = connection.initiated_event();
        let replaced_terminal = self
            .connections
            .insert(endpoint_id.clone(), connection)
            .is_some();

        info!("Connection {} {} initiated", direction, endpoint_id);
        self.stats.connections_initiated += 1;
        Initiation {
            event,
            replaced_terminal,
        }
    }

    fn apply_notification(
        &mut self,
        endpoint_id: &EndpointId,
        event: LifecycleEvent,
        now: Timestamp,
    ) -> EventBatch {
        let event_name = event.name();
        match self.apply(endpoint_id, event, now) {
            Ok(events) => events,
            Err(err) => {
                debug!("Dropping {} for {}: {}", event_name, endpoint_id, err);
                self.stats.stale_notifications_dropped += 1;
                EventBatch::new()
            }
        }
    }

    fn apply(
        &mut self,
        endpoint_id: &EndpointId,
        event: LifecycleEvent,
        now: Timestamp,
    ) -> core::result::Result<EventBatch, TransitionError> {
        let current = self.connections.get(endpoint_id).ok_or(
            // Unknown endpoints behave like destroyed records
            TransitionError::InvalidTransition {
                from: ConnectionState::Disconnected,
                event: event.name(),
            },
        )?;
        let transition = current.transition(event, now)?;

        match transition.connection.state {
            ConnectionState::Connected => self.stats.connections_established += 1,
            ConnectionState::Failed => self.stats.connections_failed += 1,
            ConnectionState::Disconnected => self.stats.connections_disconnected += 1,
            ConnectionState::Initiated => {}
        }
        info!(
            "Connection {}: {} -> {} ({})",
            endpoint_id,
            transition.audit_entry.from_state,
            transition.audit_entry.to_state,
            transition.audit_entry.event
        );

        self.connections
            .insert(endpoint_id.clone(), transition.connection);
        self.audit_trail.push_back(transition.audit_entry);
        while self.audit_trail.len() > self.audit_limit {
            self.audit_trail.pop_front();
        }
        Ok(transition.events)
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Counters for connection management
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    pub connections_initiated: u64,
    pub connections_established: u64,
    pub connections_failed: u64,
    pub connections_disconnected: u64,
    pub stale_notifications_dropped: u64,
    pub records_destroyed: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
