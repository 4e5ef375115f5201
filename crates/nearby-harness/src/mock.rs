//! Recording mock provider
//!
//! Every command is recorded and succeeds unless a failure was armed with
//! [`MockProvider::fail_next`]. Notifications never happen on their own; the
//! test injects them through the helper methods.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use nearby_core::{
    create_notification_channel, EndpointId, NotificationSink, NotificationStream,
    OutgoingPayload, PayloadId, PayloadProgress, ProviderError, ProviderNotification,
    TransferStatus, TransportProvider,
};
use tokio::io::AsyncReadExt;
use tracing::debug;

// ----------------------------------------------------------------------------
// Recorded Calls
// ----------------------------------------------------------------------------

/// A command issued on the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    Advertise { local_name: String },
    StopAdvertise,
    Discover,
    StopDiscover,
    Connect { endpoint_id: EndpointId, local_name: String },
    Accept { endpoint_id: EndpointId },
    Reject { endpoint_id: EndpointId },
    Send { endpoint_id: EndpointId, payload_id: PayloadId },
    Disconnect { endpoint_id: EndpointId },
}

/// Commands that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    Advertise,
    Discover,
    Connect,
    Accept,
    Reject,
    Send,
}

/// Payload handed to the provider, read to the end
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPayload {
    pub endpoint_id: EndpointId,
    pub payload_id: PayloadId,
    pub name: String,
    pub total_bytes: Option<u64>,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    calls: Vec<ProviderCall>,
    failures: HashMap<MockOperation, String>,
    sent: Vec<SentPayload>,
}

// ----------------------------------------------------------------------------
// Mock Provider
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct MockProvider {
    state: Arc<Mutex<MockState>>,
    sink: NotificationSink,
}

impl MockProvider {
    /// Create a provider and the notification stream the runtime should drain
    pub fn new() -> (Self, NotificationStream) {
        let (sink, stream) = create_notification_channel();
        let provider = Self {
            state: Arc::new(Mutex::new(MockState::default())),
            sink,
        };
        (provider, stream)
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the calls it recorded
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next call of `operation` fail with `reason`
    pub fn fail_next(&self, operation: MockOperation, reason: impl Into<String>) {
        self.state().failures.insert(operation, reason.into());
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    /// Recorded calls since the last `take_calls`
    pub fn take_calls(&self) -> Vec<ProviderCall> {
        std::mem::take(&mut self.state().calls)
    }

    pub fn sent_payloads(&self) -> Vec<SentPayload> {
        self.state().sent.clone()
    }

    fn record(&self, call: ProviderCall, operation: Option<MockOperation>) -> Result<(), ProviderError> {
        debug!("Mock provider call: {:?}", call);
        let mut state = self.state();
        state.calls.push(call);
        match operation.and_then(|op| state.failures.remove(&op)) {
            Some(reason) => Err(ProviderError::new(reason)),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // Notification Injection
    // ------------------------------------------------------------------------

    pub fn notify(&self, notification: ProviderNotification) {
        // The runtime may already be gone at the end of a test
        let _ = self.sink.send(notification);
    }

    pub fn found(&self, endpoint_id: &str, name: &str) {
        self.notify(ProviderNotification::EndpointFound {
            endpoint_id: EndpointId::new(endpoint_id),
            name: name.to_string(),
        });
    }

    pub fn lost(&self, endpoint_id: &str) {
        self.notify(ProviderNotification::EndpointLost {
            endpoint_id: EndpointId::new(endpoint_id),
        });
    }

    pub fn initiated(&self, endpoint_id: &str, peer_name: &str) {
        self.notify(ProviderNotification::ConnectionInitiated {
            endpoint_id: EndpointId::new(endpoint_id),
            peer_name: peer_name.to_string(),
        });
    }

    pub fn connection_result(&self, endpoint_id: &str, success: bool, reason: Option<&str>) {
        self.notify(ProviderNotification::ConnectionResult {
            endpoint_id: EndpointId::new(endpoint_id),
            success,
            reason: reason.map(str::to_string),
        });
    }

    pub fn disconnected(&self, endpoint_id: &str) {
        self.notify(ProviderNotification::Disconnected {
            endpoint_id: EndpointId::new(endpoint_id),
        });
    }

    pub fn progress(
        &self,
        endpoint_id: &str,
        payload_id: &PayloadId,
        bytes_transferred: u64,
        total_bytes: Option<u64>,
        status: TransferStatus,
    ) {
        self.notify(ProviderNotification::PayloadProgress(PayloadProgress {
            endpoint_id: EndpointId::new(endpoint_id),
            payload_id: payload_id.clone(),
            bytes_transferred,
            total_bytes,
            status,
        }));
    }
}

#[async_trait]
impl TransportProvider for MockProvider {
    async fn advertise(&self, local_name: &str) -> Result<(), ProviderError> {
        self.record(
            ProviderCall::Advertise {
                local_name: local_name.to_string(),
            },
            Some(MockOperation::Advertise),
        )
    }

    async fn stop_advertise(&self) {
        let _ = self.record(ProviderCall::StopAdvertise, None);
    }

    async fn discover(&self) -> Result<(), ProviderError> {
        self.record(ProviderCall::Discover, Some(MockOperation::Discover))
    }

    async fn stop_discover(&self) {
        let _ = self.record(ProviderCall::StopDiscover, None);
    }

    async fn connect(&self, endpoint_id: &EndpointId, local_name: &str) -> Result<(), ProviderError> {
        self.record(
            ProviderCall::Connect {
                endpoint_id: endpoint_id.clone(),
                local_name: local_name.to_string(),
            },
            Some(MockOperation::Connect),
        )
    }

    async fn accept(&self, endpoint_id: &EndpointId) -> Result<(), ProviderError> {
        self.record(
            ProviderCall::Accept {
                endpoint_id: endpoint_id.clone(),
            },
            Some(MockOperation::Accept),
        )
    }

    async fn reject(&self, endpoint_id: &EndpointId) -> Result<(), ProviderError> {
        self.record(
            ProviderCall::Reject {
                endpoint_id: endpoint_id.clone(),
            },
            Some(MockOperation::Reject),
        )
    }

    async fn send(&self, endpoint_id: &EndpointId, payload: OutgoingPayload) -> Result<(), ProviderError> {
        self.record(
            ProviderCall::Send {
                endpoint_id: endpoint_id.clone(),
                payload_id: payload.id.clone(),
            },
            Some(MockOperation::Send),
        )?;

        let OutgoingPayload {
            id,
            name,
            total_bytes,
            mut reader,
        } = payload;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|err| ProviderError::new(format!("read failed: {}", err)))?;

        self.state().sent.push(SentPayload {
            endpoint_id: endpoint_id.clone(),
            payload_id: id,
            name,
            total_bytes,
            bytes,
        });
        Ok(())
    }

    async fn disconnect(&self, endpoint_id: &EndpointId) {
        let _ = self.record(
            ProviderCall::Disconnect {
                endpoint_id: endpoint_id.clone(),
            },
            None,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_armed_failure_fires_once() {
        let (provider, _stream) = MockProvider::new();
        provider.fail_next(MockOperation::Discover, "STATUS_BLUETOOTH_ERROR");

        let err = provider.discover().await.unwrap_err();
        assert_eq!(err.message(), "STATUS_BLUETOOTH_ERROR");
        assert!(provider.discover().await.is_ok());
        assert_eq!(
            provider.calls(),
            vec![ProviderCall::Discover, ProviderCall::Discover]
        );
    }

    #[tokio::test]
    async fn test_injected_notifications_arrive_in_order() {
        let (provider, mut stream) = MockProvider::new();
        provider.found("AAAA", "Alice");
        provider.lost("AAAA");

        assert!(matches!(
            stream.recv().await,
            Some(ProviderNotification::EndpointFound { .. })
        ));
        assert!(matches!(
            stream.recv().await,
            Some(ProviderNotification::EndpointLost { .. })
        ));
    }
}
