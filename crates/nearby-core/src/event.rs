//! Consumer-facing events
//!
//! The six event kinds delivered on the event bus. Managers produce them as
//! the result of a mutation; they never publish anything themselves.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::connection::FailureReason;
use crate::transfer::PayloadTransfer;
use crate::types::{Direction, EndpointId};

/// Events produced by a single mutation (rarely more than two)
pub type EventBatch = SmallVec<[NearbyEvent; 2]>;

/// Typed notification delivered to every event bus subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NearbyEvent {
    /// First sighting of an endpoint in the current known interval
    EndpointDiscovered {
        endpoint_id: EndpointId,
        display_name: String,
    },
    /// Endpoint is no longer discoverable
    EndpointLost { endpoint_id: EndpointId },
    /// A connection record entered `Initiated`
    ConnectionInitiated {
        endpoint_id: EndpointId,
        peer_name: Option<String>,
        direction: Direction,
    },
    /// Negotiation resolved
    ConnectionResult {
        endpoint_id: EndpointId,
        success: bool,
        reason: Option<FailureReason>,
    },
    /// Connection reached `Disconnected`
    Disconnected { endpoint_id: EndpointId },
    /// Snapshot of a transfer after a progress or terminal update
    TransferUpdate(PayloadTransfer),
}

impl NearbyEvent {
    /// Endpoint this event concerns
    pub fn endpoint_id(&self) -> &EndpointId {
        match self {
            NearbyEvent::EndpointDiscovered { endpoint_id, .. }
            | NearbyEvent::EndpointLost { endpoint_id }
            | NearbyEvent::ConnectionInitiated { endpoint_id, .. }
            | NearbyEvent::ConnectionResult { endpoint_id, .. }
            | NearbyEvent::Disconnected { endpoint_id } => endpoint_id,
            NearbyEvent::TransferUpdate(transfer) => &transfer.endpoint_id,
        }
    }

    /// Short event name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            NearbyEvent::EndpointDiscovered { .. } => "EndpointDiscovered",
            NearbyEvent::EndpointLost { .. } => "EndpointLost",
            NearbyEvent::ConnectionInitiated { .. } => "ConnectionInitiated",
            NearbyEvent::ConnectionResult { .. } => "ConnectionResult",
            NearbyEvent::Disconnected { .. } => "Disconnected",
            NearbyEvent::TransferUpdate(_) => "TransferUpdate",
        }
    }
}
