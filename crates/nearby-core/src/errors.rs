//! Error types for command-level failures
//!
//! Every error here is scoped to one endpoint, one payload or one activity and
//! is returned as the failed result of the command that caused it. Failures
//! that happen after a command already succeeded travel on the event stream.

use crate::connection::ConnectionState;
use crate::provider::ProviderError;
use crate::types::{Activity, EndpointId};

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Command-level error taxonomy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NearbyError {
    #[error("Connection attempt already in progress for endpoint {endpoint_id}")]
    DuplicateConnectionAttempt { endpoint_id: EndpointId },

    #[error(
        "Cannot {operation} connection to {endpoint_id} in state {}",
        state_label(.state)
    )]
    InvalidState {
        endpoint_id: EndpointId,
        operation: &'static str,
        state: Option<ConnectionState>,
    },

    #[error("Endpoint not discovered: {endpoint_id}")]
    EndpointUnknown { endpoint_id: EndpointId },

    #[error("No active connection to endpoint {endpoint_id}")]
    NoActiveConnection { endpoint_id: EndpointId },

    #[error("Payload source error: {reason}")]
    PayloadSourceError { reason: String },

    #[error("{activity} already active")]
    AlreadyActive { activity: Activity },

    #[error("Transport failure: {reason}")]
    TransportFailure { reason: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },
}

fn state_label(state: &Option<ConnectionState>) -> &'static str {
    state.as_ref().map(|s| s.name()).unwrap_or("None")
}

impl NearbyError {
    pub fn invalid_state(
        endpoint_id: &EndpointId,
        operation: &'static str,
        state: Option<ConnectionState>,
    ) -> Self {
        NearbyError::InvalidState {
            endpoint_id: endpoint_id.clone(),
            operation,
            state,
        }
    }

    pub fn payload_source(err: std::io::Error) -> Self {
        NearbyError::PayloadSourceError {
            reason: err.to_string(),
        }
    }
}

impl From<ProviderError> for NearbyError {
    fn from(err: ProviderError) -> Self {
        NearbyError::TransportFailure {
            reason: err.message().to_string(),
        }
    }
}

pub type Result<T> = core::result::Result<T, NearbyError>;
