//! Nearby Runtime
//!
//! The async shell around `nearby-core`:
//! - [`EventBus`]: broadcast of typed events to any number of subscribers
//! - the notification dispatcher task, which applies provider notifications to
//!   the core managers and sweeps expired connection records
//! - [`NearbyConnections`]: the command facade consumers call
//! - [`NearbyBuilder`]: configuration and startup

pub mod builder;
pub mod bus;
mod dispatcher;
pub mod facade;
mod shared;

pub use builder::NearbyBuilder;
pub use bus::{EventBus, EventSubscription};
pub use facade::NearbyConnections;

// Re-export core types for convenience
pub use nearby_core::{
    Activity, BytesSource, Connection, ConnectionState, Direction, Endpoint, EndpointId,
    FailureReason, FileSource, NearbyConfig, NearbyError, NearbyEvent, PayloadId, PayloadSource,
    PayloadTransfer, Result, TransferStatus, TransportProvider,
};
