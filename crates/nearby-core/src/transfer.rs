//! Payload transfer tracking
//!
//! Transfers are keyed by `(endpoint, payload)`. Byte counts only move
//! forward, never past the declared total, and a transfer that reached
//! `Success` or `Failure` ignores every later update. Payloads that were
//! drained or discarded stay retired until their connection is destroyed, so a
//! late report can never bring them back.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::event::NearbyEvent;
use crate::provider::PayloadProgress;
use crate::types::{Direction, EndpointId, PayloadId, Timestamp};

// ----------------------------------------------------------------------------
// Transfer Types
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferStatus {
    InProgress,
    Success,
    Failure,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::InProgress)
    }
}

/// Progress of one payload moving to or from one endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadTransfer {
    pub endpoint_id: EndpointId,
    pub payload_id: PayloadId,
    pub direction: Direction,
    /// Declared name for outgoing payloads
    pub name: Option<String>,
    /// Fixed when the transfer is created; `None` for unknown length
    pub total_bytes: Option<u64>,
    pub bytes_transferred: u64,
    pub status: TransferStatus,
    pub started_at: Timestamp,
    pub updated_at: Timestamp,
}

impl PayloadTransfer {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Completed fraction in `[0, 1]`, `None` when the total is unknown
    pub fn progress(&self) -> Option<f64> {
        match self.total_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.bytes_transferred as f64 / total as f64).min(1.0)),
            None => None,
        }
    }

    /// Average throughput in bytes per second since the transfer started
    pub fn speed(&self) -> Option<f64> {
        let elapsed = self.updated_at.duration_since(self.started_at);
        if elapsed.is_zero() || self.bytes_transferred == 0 {
            return None;
        }
        Some(self.bytes_transferred as f64 / elapsed.as_secs_f64())
    }

    /// Estimated time remaining at the current average speed
    pub fn eta(&self) -> Option<Duration> {
        if self.is_terminal() {
            return None;
        }
        let total = self.total_bytes?;
        let speed = self.speed()?;
        let remaining = total.saturating_sub(self.bytes_transferred);
        Duration::try_from_secs_f64(remaining as f64 / speed).ok()
    }
}

// ----------------------------------------------------------------------------
// Transfer Tracker
// ----------------------------------------------------------------------------

type TransferKey = (EndpointId, PayloadId);

/// Keyed store of every live and unacknowledged transfer
#[derive(Debug, Default)]
pub struct TransferTracker {
    transfers: HashMap<TransferKey, PayloadTransfer>,
    /// Payload ids removed before their connection was destroyed
    retired: HashMap<EndpointId, HashSet<PayloadId>>,
    stats: TransferStats,
}

impl TransferTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an outgoing transfer before the send is delegated
    pub fn begin_outgoing(
        &mut self,
        endpoint_id: &EndpointId,
        payload_id: &PayloadId,
        name: String,
        total_bytes: Option<u64>,
        now: Timestamp,
    ) {
        let transfer = PayloadTransfer {
            endpoint_id: endpoint_id.clone(),
            payload_id: payload_id.clone(),
            direction: Direction::Outgoing,
            name: Some(name),
            total_bytes,
            bytes_transferred: 0,
            status: TransferStatus::InProgress,
            started_at: now,
            updated_at: now,
        };
        debug!("Registered outgoing payload {} to {}", payload_id, endpoint_id);
        self.transfers
            .insert((endpoint_id.clone(), payload_id.clone()), transfer);
        self.stats.transfers_started += 1;
    }

    /// Forget a transfer whose send never started
    pub fn discard(&mut self, endpoint_id: &EndpointId, payload_id: &PayloadId) -> bool {
        self.retire(endpoint_id, payload_id);
        self.transfers
            .remove(&(endpoint_id.clone(), payload_id.clone()))
            .is_some()
    }

    fn retire(&mut self, endpoint_id: &EndpointId, payload_id: &PayloadId) {
        self.retired
            .entry(endpoint_id.clone())
            .or_default()
            .insert(payload_id.clone());
    }

    fn is_retired(&self, endpoint_id: &EndpointId, payload_id: &PayloadId) -> bool {
        self.retired
            .get(endpoint_id)
            .is_some_and(|retired| retired.contains(payload_id))
    }

    /// Apply a provider progress report
    ///
    /// Unknown payloads become new incoming transfers only when
    /// `allow_new_incoming` is set. Returns the `TransferUpdate` to publish,
    /// or `None` when the report was dropped.
    pub fn apply_progress(
        &mut self,
        progress: &PayloadProgress,
        allow_new_incoming: bool,
        now: Timestamp,
    ) -> Option<NearbyEvent> {
        let key = (progress.endpoint_id.clone(), progress.payload_id.clone());

        if self.is_retired(&progress.endpoint_id, &progress.payload_id) {
            debug!(
                "Dropping progress for retired payload {} from {}",
                progress.payload_id, progress.endpoint_id
            );
            self.stats.updates_dropped += 1;
            return None;
        }

        let Some(transfer) = self.transfers.get_mut(&key) else {
            if !allow_new_incoming {
                debug!(
                    "Dropping progress for unknown payload {} from {}",
                    progress.payload_id, progress.endpoint_id
                );
                self.stats.updates_dropped += 1;
                return None;
            }
            let transfer = PayloadTransfer {
                endpoint_id: progress.endpoint_id.clone(),
                payload_id: progress.payload_id.clone(),
                direction: Direction::Incoming,
                name: None,
                total_bytes: progress.total_bytes,
                bytes_transferred: clamp(progress.bytes_transferred, progress.total_bytes),
                status: progress.status,
                started_at: now,
                updated_at: now,
            };
            debug!(
                "Incoming payload {} from {}",
                progress.payload_id, progress.endpoint_id
            );
            self.stats.transfers_started += 1;
            self.count_terminal(transfer.status);
            self.transfers.insert(key, transfer.clone());
            return Some(NearbyEvent::TransferUpdate(transfer));
        };

        if transfer.is_terminal() {
            debug!(
                "Dropping progress for finished payload {} ({:?})",
                transfer.payload_id, transfer.status
            );
            self.stats.updates_dropped += 1;
            return None;
        }

        let reported = clamp(progress.bytes_transferred, transfer.total_bytes);
        if reported < transfer.bytes_transferred {
            warn!(
                "Payload {} reported {} bytes after {}, keeping the larger count",
                transfer.payload_id, reported, transfer.bytes_transferred
            );
        }
        transfer.bytes_transferred = transfer.bytes_transferred.max(reported);
        transfer.status = progress.status;
        transfer.updated_at = now;

        let snapshot = transfer.clone();
        self.count_terminal(snapshot.status);
        Some(NearbyEvent::TransferUpdate(snapshot))
    }

    /// Fail every in-flight transfer on `endpoint_id`, returning their final updates
    pub fn fail_in_flight(&mut self, endpoint_id: &EndpointId, now: Timestamp) -> Vec<NearbyEvent> {
        let mut events = Vec::new();
        for transfer in self.transfers.values_mut() {
            if &transfer.endpoint_id == endpoint_id && !transfer.is_terminal() {
                transfer.status = TransferStatus::Failure;
                transfer.updated_at = now;
                events.push(NearbyEvent::TransferUpdate(transfer.clone()));
            }
        }
        self.stats.transfers_failed += events.len() as u64;
        if !events.is_empty() {
            debug!(
                "Failed {} in-flight transfer(s) on {}",
                events.len(),
                endpoint_id
            );
        }
        events
    }

    /// Destroy every transfer belonging to `endpoint_id`
    pub fn remove_endpoint(&mut self, endpoint_id: &EndpointId) -> usize {
        self.retired.remove(endpoint_id);
        let before = self.transfers.len();
        self.transfers.retain(|(id, _), _| id != endpoint_id);
        before - self.transfers.len()
    }

    /// Remove and return every finished transfer
    pub fn drain_completed(&mut self) -> Vec<PayloadTransfer> {
        let finished: Vec<TransferKey> = self
            .transfers
            .iter()
            .filter(|(_, transfer)| transfer.is_terminal())
            .map(|(key, _)| key.clone())
            .collect();

        let mut drained = Vec::with_capacity(finished.len());
        for (endpoint_id, payload_id) in &finished {
            self.retire(endpoint_id, payload_id);
            if let Some(transfer) = self.transfers.remove(&(endpoint_id.clone(), payload_id.clone())) {
                drained.push(transfer);
            }
        }
        drained.sort_by(|a, b| {
            (a.started_at, &a.payload_id).cmp(&(b.started_at, &b.payload_id))
        });
        drained
    }

    pub fn get(&self, endpoint_id: &EndpointId, payload_id: &PayloadId) -> Option<&PayloadTransfer> {
        self.transfers.get(&(endpoint_id.clone(), payload_id.clone()))
    }

    /// Snapshot of every tracked transfer, oldest first
    pub fn transfers(&self) -> Vec<PayloadTransfer> {
        let mut transfers: Vec<PayloadTransfer> = self.transfers.values().cloned().collect();
        transfers.sort_by(|a, b| {
            (a.started_at, &a.payload_id).cmp(&(b.started_at, &b.payload_id))
        });
        transfers
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    fn count_terminal(&mut self, status: TransferStatus) {
        match status {
            TransferStatus::Success => self.stats.transfers_succeeded += 1,
            TransferStatus::Failure => self.stats.transfers_failed += 1,
            TransferStatus::InProgress => {}
        }
    }
}

fn clamp(bytes: u64, total: Option<u64>) -> u64 {
    match total {
        Some(total) => bytes.min(total),
        None => bytes,
    }
}

/// Counters for transfer tracking
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    pub transfers_started: u64,
    pub transfers_succeeded: u64,
    pub transfers_failed: u64,
    pub updates_dropped: u64,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
