//! Transport provider capability interface
//!
//! The provider performs the physical advertise, discover, connect and send
//! operations. Commands are issued through [`TransportProvider`]; everything
//! the provider learns asynchronously is pushed into a [`NotificationSink`] as
//! a [`ProviderNotification`]. The sink is an unbounded channel so callbacks
//! arriving on arbitrary threads never block.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::source::PayloadReader;
use crate::transfer::TransferStatus;
use crate::types::{EndpointId, PayloadId};

// ----------------------------------------------------------------------------
// Provider Errors
// ----------------------------------------------------------------------------

/// Opaque failure reported by the provider for a single command
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

// ----------------------------------------------------------------------------
// Outgoing Payload
// ----------------------------------------------------------------------------

/// Byte stream handed to the provider for sending
pub struct OutgoingPayload {
    /// Identifier assigned before the send was delegated
    pub id: PayloadId,
    /// Declared name, e.g. the file name
    pub name: String,
    /// Declared size, `None` for streams of unknown length
    pub total_bytes: Option<u64>,
    /// Opened byte stream
    pub reader: PayloadReader,
}

impl fmt::Debug for OutgoingPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingPayload")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("total_bytes", &self.total_bytes)
            .finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Transport Provider Trait
// ----------------------------------------------------------------------------

/// Physical-layer operations the core delegates to
///
/// Only the command facade issues calls on a provider. A provider instance is
/// owned by exactly one facade for the lifetime of the process.
#[async_trait]
pub trait TransportProvider: Send + Sync + 'static {
    /// Start advertising under `local_name`
    async fn advertise(&self, local_name: &str) -> Result<(), ProviderError>;

    async fn stop_advertise(&self);

    /// Start scanning; sightings arrive as `EndpointFound`/`EndpointLost`
    async fn discover(&self) -> Result<(), ProviderError>;

    async fn stop_discover(&self);

    /// Request a connection; resolution arrives as `ConnectionResult`
    async fn connect(&self, endpoint_id: &EndpointId, local_name: &str)
        -> Result<(), ProviderError>;

    /// Consent to a pending connection
    async fn accept(&self, endpoint_id: &EndpointId) -> Result<(), ProviderError>;

    /// Refuse a pending connection
    async fn reject(&self, endpoint_id: &EndpointId) -> Result<(), ProviderError>;

    /// Start streaming a payload; progress arrives as `PayloadProgress`
    async fn send(
        &self,
        endpoint_id: &EndpointId,
        payload: OutgoingPayload,
    ) -> Result<(), ProviderError>;

    /// Tear down the link to `endpoint_id`
    async fn disconnect(&self, endpoint_id: &EndpointId);
}

// ----------------------------------------------------------------------------
// Notifications
// ----------------------------------------------------------------------------

/// Progress report for one payload on one endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadProgress {
    pub endpoint_id: EndpointId,
    pub payload_id: PayloadId,
    pub bytes_transferred: u64,
    /// `None` when the provider does not know the size
    pub total_bytes: Option<u64>,
    pub status: TransferStatus,
}

/// Asynchronous facts reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderNotification {
    EndpointFound {
        endpoint_id: EndpointId,
        name: String,
    },
    EndpointLost {
        endpoint_id: EndpointId,
    },
    ConnectionInitiated {
        endpoint_id: EndpointId,
        peer_name: String,
    },
    ConnectionResult {
        endpoint_id: EndpointId,
        success: bool,
        reason: Option<String>,
    },
    Disconnected {
        endpoint_id: EndpointId,
    },
    PayloadProgress(PayloadProgress),
}

impl ProviderNotification {
    pub fn endpoint_id(&self) -> &EndpointId {
        match self {
            ProviderNotification::EndpointFound { endpoint_id, .. }
            | ProviderNotification::EndpointLost { endpoint_id }
            | ProviderNotification::ConnectionInitiated { endpoint_id, .. }
            | ProviderNotification::ConnectionResult { endpoint_id, .. }
            | ProviderNotification::Disconnected { endpoint_id } => endpoint_id,
            ProviderNotification::PayloadProgress(progress) => &progress.endpoint_id,
        }
    }
}

pub type NotificationSink = mpsc::UnboundedSender<ProviderNotification>;
pub type NotificationStream = mpsc::UnboundedReceiver<ProviderNotification>;

/// Create the channel a provider reports into and the runtime drains
pub fn create_notification_channel() -> (NotificationSink, NotificationStream) {
    mpsc::unbounded_channel()
}
