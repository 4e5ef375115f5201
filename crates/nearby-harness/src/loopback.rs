//! In-memory radio for multi-node tests and demos
//!
//! Every [`LoopbackProvider`] attached to the same [`LoopbackMedium`] sees the
//! others the way devices in radio range would: advertising nodes are found by
//! discovering nodes, both sides of a connection must accept before the link is
//! up, and payloads are streamed in chunks with progress reported to sender
//! and receiver alike.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use nearby_core::{
    create_notification_channel, EndpointId, NotificationSink, NotificationStream,
    OutgoingPayload, PayloadId, PayloadProgress, PayloadReader, ProviderError,
    ProviderNotification, TransferStatus, TransportProvider,
};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

const ENDPOINT_ID_LEN: usize = 4;
const DEFAULT_CHUNK_SIZE: usize = 4096;

// ----------------------------------------------------------------------------
// Medium State
// ----------------------------------------------------------------------------

#[derive(Debug)]
struct Node {
    sink: NotificationSink,
    advertised_name: Option<String>,
    discovering: bool,
    /// Established links
    links: HashSet<EndpointId>,
    /// Completed incoming payloads keyed by sender
    received: HashMap<(EndpointId, PayloadId), Vec<u8>>,
}

impl Node {
    fn notify(&self, notification: ProviderNotification) {
        if self.sink.send(notification).is_err() {
            debug!("Loopback node runtime is gone, dropping notification");
        }
    }
}

#[derive(Debug)]
struct PendingLink {
    requester: EndpointId,
    target: EndpointId,
    accepted: HashSet<EndpointId>,
}

impl PendingLink {
    fn involves(&self, a: &EndpointId, b: &EndpointId) -> bool {
        (&self.requester == a && &self.target == b) || (&self.requester == b && &self.target == a)
    }
}

#[derive(Debug, Default)]
struct MediumState {
    nodes: HashMap<EndpointId, Node>,
    pending: Vec<PendingLink>,
}

impl MediumState {
    fn node(&self, id: &EndpointId) -> Result<&Node, ProviderError> {
        self.nodes
            .get(id)
            .ok_or_else(|| ProviderError::new("STATUS_ENDPOINT_UNKNOWN"))
    }

    fn node_mut(&mut self, id: &EndpointId) -> Result<&mut Node, ProviderError> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| ProviderError::new("STATUS_ENDPOINT_UNKNOWN"))
    }

    fn notify(&self, id: &EndpointId, notification: ProviderNotification) {
        if let Some(node) = self.nodes.get(id) {
            node.notify(notification);
        }
    }

    fn is_linked(&self, a: &EndpointId, b: &EndpointId) -> bool {
        self.nodes.get(a).is_some_and(|node| node.links.contains(b))
    }

    fn take_pending(&mut self, a: &EndpointId, b: &EndpointId) -> Option<PendingLink> {
        let index = self.pending.iter().position(|link| link.involves(a, b))?;
        Some(self.pending.remove(index))
    }
}

// ----------------------------------------------------------------------------
// Medium
// ----------------------------------------------------------------------------

/// Shared in-memory radio
#[derive(Debug, Clone)]
pub struct LoopbackMedium {
    state: Arc<Mutex<MediumState>>,
    chunk_size: usize,
}

impl Default for LoopbackMedium {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE)
    }
}

impl LoopbackMedium {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MediumState::default())),
            chunk_size: chunk_size.max(1),
        }
    }

    fn state(&self) -> MutexGuard<'_, MediumState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a new node; returns its provider and notification stream
    pub fn attach(&self) -> (LoopbackProvider, NotificationStream) {
        let (sink, stream) = create_notification_channel();
        let mut state = self.state();

        let local_id = loop {
            let candidate = EndpointId::new(
                std::iter::repeat_with(fastrand::alphanumeric)
                    .take(ENDPOINT_ID_LEN)
                    .collect::<String>()
                    .to_uppercase(),
            );
            if !state.nodes.contains_key(&candidate) {
                break candidate;
            }
        };
        debug!("Loopback node {} attached", local_id);

        state.nodes.insert(
            local_id.clone(),
            Node {
                sink,
                advertised_name: None,
                discovering: false,
                links: HashSet::new(),
                received: HashMap::new(),
            },
        );

        let provider = LoopbackProvider {
            medium: self.clone(),
            local_id,
        };
        (provider, stream)
    }
}

// ----------------------------------------------------------------------------
// Provider
// ----------------------------------------------------------------------------

/// One node on a [`LoopbackMedium`]
#[derive(Debug, Clone)]
pub struct LoopbackProvider {
    medium: LoopbackMedium,
    local_id: EndpointId,
}

impl LoopbackProvider {
    /// The id other nodes see this node under
    pub fn local_id(&self) -> &EndpointId {
        &self.local_id
    }

    /// Bytes of a completed incoming payload
    pub fn received(&self, from: &EndpointId, payload_id: &PayloadId) -> Option<Vec<u8>> {
        self.medium
            .state()
            .nodes
            .get(&self.local_id)
            .and_then(|node| node.received.get(&(from.clone(), payload_id.clone())).cloned())
    }

    fn progress(
        from: &EndpointId,
        payload_id: &PayloadId,
        bytes_transferred: u64,
        total_bytes: Option<u64>,
        status: TransferStatus,
    ) -> ProviderNotification {
        ProviderNotification::PayloadProgress(PayloadProgress {
            endpoint_id: from.clone(),
            payload_id: payload_id.clone(),
            bytes_transferred,
            total_bytes,
            status,
        })
    }
}

#[async_trait]
impl TransportProvider for LoopbackProvider {
    async fn advertise(&self, local_name: &str) -> Result<(), ProviderError> {
        let mut state = self.medium.state();
        state.node_mut(&self.local_id)?.advertised_name = Some(local_name.to_string());

        for (id, node) in &state.nodes {
            if id != &self.local_id && node.discovering {
                node.notify(ProviderNotification::EndpointFound {
                    endpoint_id: self.local_id.clone(),
                    name: local_name.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn stop_advertise(&self) {
        let mut state = self.medium.state();
        let Ok(node) = state.node_mut(&self.local_id) else {
            return;
        };
        if node.advertised_name.take().is_none() {
            return;
        }
        for (id, node) in &state.nodes {
            if id != &self.local_id && node.discovering {
                node.notify(ProviderNotification::EndpointLost {
                    endpoint_id: self.local_id.clone(),
                });
            }
        }
    }

    async fn discover(&self) -> Result<(), ProviderError> {
        let mut state = self.medium.state();
        state.node_mut(&self.local_id)?.discovering = true;

        let local = state.node(&self.local_id)?;
        for (id, node) in state.nodes.iter().filter(|(id, _)| *id != &self.local_id) {
            if let Some(name) = &node.advertised_name {
                local.notify(ProviderNotification::EndpointFound {
                    endpoint_id: id.clone(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    async fn stop_discover(&self) {
        if let Ok(node) = self.medium.state().node_mut(&self.local_id) {
            node.discovering = false;
        }
    }

    async fn connect(&self, endpoint_id: &EndpointId, local_name: &str) -> Result<(), ProviderError> {
        let mut state = self.medium.state();
        let target_name = state
            .node(endpoint_id)?
            .advertised_name
            .clone()
            .ok_or_else(|| ProviderError::new("STATUS_ENDPOINT_UNKNOWN"))?;
        if state.is_linked(&self.local_id, endpoint_id)
            || state
                .pending
                .iter()
                .any(|link| link.involves(&self.local_id, endpoint_id))
        {
            return Err(ProviderError::new("STATUS_ALREADY_CONNECTED_TO_ENDPOINT"));
        }

        state.pending.push(PendingLink {
            requester: self.local_id.clone(),
            target: endpoint_id.clone(),
            accepted: HashSet::new(),
        });
        state.notify(
            &self.local_id,
            ProviderNotification::ConnectionInitiated {
                endpoint_id: endpoint_id.clone(),
                peer_name: target_name,
            },
        );
        state.notify(
            endpoint_id,
            ProviderNotification::ConnectionInitiated {
                endpoint_id: self.local_id.clone(),
                peer_name: local_name.to_string(),
            },
        );
        Ok(())
    }

    async fn accept(&self, endpoint_id: &EndpointId) -> Result<(), ProviderError> {
        let mut state = self.medium.state();
        let mut link = state
            .take_pending(&self.local_id, endpoint_id)
            .ok_or_else(|| ProviderError::new("STATUS_OUT_OF_ORDER_API_CALL"))?;
        link.accepted.insert(self.local_id.clone());

        if link.accepted.len() < 2 {
            state.pending.push(link);
            return Ok(());
        }

        for (a, b) in [(&link.requester, &link.target), (&link.target, &link.requester)] {
            if let Ok(node) = state.node_mut(a) {
                node.links.insert(b.clone());
            }
            state.notify(
                a,
                ProviderNotification::ConnectionResult {
                    endpoint_id: b.clone(),
                    success: true,
                    reason: None,
                },
            );
        }
        Ok(())
    }

    async fn reject(&self, endpoint_id: &EndpointId) -> Result<(), ProviderError> {
        let mut state = self.medium.state();
        let link = state
            .take_pending(&self.local_id, endpoint_id)
            .ok_or_else(|| ProviderError::new("STATUS_OUT_OF_ORDER_API_CALL"))?;

        for (a, b) in [(&link.requester, &link.target), (&link.target, &link.requester)] {
            state.notify(
                a,
                ProviderNotification::ConnectionResult {
                    endpoint_id: b.clone(),
                    success: false,
                    reason: Some("STATUS_CONNECTION_REJECTED".to_string()),
                },
            );
        }
        Ok(())
    }

    async fn send(&self, endpoint_id: &EndpointId, payload: OutgoingPayload) -> Result<(), ProviderError> {
        if !self.medium.state().is_linked(&self.local_id, endpoint_id) {
            return Err(ProviderError::new("STATUS_ENDPOINT_IO_ERROR"));
        }

        let task = ChunkedSend {
            medium: self.medium.clone(),
            from: self.local_id.clone(),
            to: endpoint_id.clone(),
            payload_id: payload.id,
            total_bytes: payload.total_bytes,
        };
        tokio::spawn(task.run(payload.reader));
        Ok(())
    }

    async fn disconnect(&self, endpoint_id: &EndpointId) {
        let mut state = self.medium.state();
        let was_linked = state.is_linked(&self.local_id, endpoint_id);
        let was_pending = state.take_pending(&self.local_id, endpoint_id).is_some();

        for (a, b) in [(&self.local_id, endpoint_id), (endpoint_id, &self.local_id)] {
            if let Ok(node) = state.node_mut(a) {
                node.links.remove(b);
            }
        }
        if was_linked || was_pending {
            state.notify(
                endpoint_id,
                ProviderNotification::Disconnected {
                    endpoint_id: self.local_id.clone(),
                },
            );
        }
    }
}

// ----------------------------------------------------------------------------
// Chunked Delivery
// ----------------------------------------------------------------------------

/// Streams one payload across a link, reporting progress to both ends
struct ChunkedSend {
    medium: LoopbackMedium,
    from: EndpointId,
    to: EndpointId,
    payload_id: PayloadId,
    total_bytes: Option<u64>,
}

impl ChunkedSend {
    async fn run(self, mut reader: PayloadReader) {
        let mut buffer = vec![0u8; self.medium.chunk_size];
        let mut delivered = Vec::new();
        self.report(0, TransferStatus::InProgress);

        loop {
            let read = match reader.read(&mut buffer).await {
                Ok(read) => read,
                Err(err) => {
                    warn!("Loopback read of payload {} failed: {}", self.payload_id, err);
                    self.report(delivered.len() as u64, TransferStatus::Failure);
                    return;
                }
            };
            if read == 0 {
                break;
            }
            if !self.medium.state().is_linked(&self.from, &self.to) {
                debug!("Link {} -> {} dropped mid-transfer", self.from, self.to);
                self.report(delivered.len() as u64, TransferStatus::Failure);
                return;
            }
            delivered.extend_from_slice(&buffer[..read]);
            self.report(delivered.len() as u64, TransferStatus::InProgress);
            tokio::task::yield_now().await;
        }

        let total = delivered.len() as u64;
        {
            let mut state = self.medium.state();
            if let Ok(node) = state.node_mut(&self.to) {
                node.received
                    .insert((self.from.clone(), self.payload_id.clone()), delivered);
            }
        }
        self.report(total, TransferStatus::Success);
    }

    fn report(&self, bytes: u64, status: TransferStatus) {
        let state = self.medium.state();
        // The sender sees the payload under the receiver's id and vice versa
        state.notify(
            &self.from,
            LoopbackProvider::progress(&self.to, &self.payload_id, bytes, self.total_bytes, status),
        );
        state.notify(
            &self.to,
            LoopbackProvider::progress(&self.from, &self.payload_id, bytes, self.total_bytes, status),
        );
    }
}
