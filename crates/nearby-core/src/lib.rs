//! Nearby Core
//!
//! Foundational types and pure state machines for a peer-to-peer discovery,
//! connection negotiation and payload transfer manager. Nothing in this crate
//! spawns tasks or takes locks: every manager is a plain struct mutated through
//! `&mut self` that hands back the events its mutation produced, so the async
//! runtime can publish them in the order they were caused.
//!
//! - [`registry`] - discovered endpoints and their liveness
//! - [`connection`] - per-endpoint connection lifecycle state machine
//! - [`transfer`] - payload transfer tracking and progress aggregation
//! - [`provider`] - the capability interface required from a transport provider
//! - [`source`] - byte sources handed to the provider on send

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod config;
pub mod connection;
pub mod errors;
pub mod event;
pub mod provider;
pub mod registry;
pub mod source;
pub mod transfer;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use config::NearbyConfig;
pub use connection::{
    AuditEntry, Connection, ConnectionManager, ConnectionState, ConnectionStats, Consent,
    DisconnectOutcome, FailureReason, Initiation, LifecycleEvent, RemoteInitiation, Transition,
    TransitionError,
};
pub use errors::{NearbyError, Result};
pub use event::{EventBatch, NearbyEvent};
pub use provider::{
    create_notification_channel, NotificationSink, NotificationStream, OutgoingPayload,
    PayloadProgress, ProviderError, ProviderNotification, TransportProvider,
};
pub use registry::{Endpoint, EndpointRegistry};
pub use source::{BytesSource, FileSource, PayloadReader, PayloadSource};
pub use transfer::{PayloadTransfer, TransferStats, TransferStatus, TransferTracker};
pub use types::{Activity, Direction, EndpointId, PayloadId, SystemTimeSource, TimeSource, Timestamp};
