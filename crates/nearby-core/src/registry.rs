//! Endpoint registry
//!
//! Tracks endpoints reported by discovery. An endpoint is announced once per
//! continuous known interval: refreshes are silent, a loss followed by a new
//! sighting announces it again.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::event::NearbyEvent;
use crate::types::{EndpointId, Timestamp};

// ----------------------------------------------------------------------------
// Endpoint
// ----------------------------------------------------------------------------

/// A discovered peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    /// Name as advertised by the peer
    pub display_name: String,
    /// First sighting in the current known interval
    pub first_seen: Timestamp,
    /// Most recent sighting
    pub last_seen: Timestamp,
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Discovered endpoints keyed by id
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    endpoints: HashMap<EndpointId, Endpoint>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record or refresh an endpoint; returns `EndpointDiscovered` only on insertion
    pub fn upsert(
        &mut self,
        endpoint_id: EndpointId,
        display_name: String,
        now: Timestamp,
    ) -> Option<NearbyEvent> {
        if let Some(existing) = self.endpoints.get_mut(&endpoint_id) {
            existing.last_seen = now;
            if existing.display_name != display_name {
                debug!(
                    "Endpoint {} renamed {:?} -> {:?}",
                    endpoint_id, existing.display_name, display_name
                );
                existing.display_name = display_name;
            }
            return None;
        }

        debug!("Discovered endpoint {} ({})", endpoint_id, display_name);
        self.endpoints.insert(
            endpoint_id.clone(),
            Endpoint {
                id: endpoint_id.clone(),
                display_name: display_name.clone(),
                first_seen: now,
                last_seen: now,
            },
        );
        Some(NearbyEvent::EndpointDiscovered {
            endpoint_id,
            display_name,
        })
    }

    /// Forget an endpoint; returns `EndpointLost` if it was known
    pub fn remove(&mut self, endpoint_id: &EndpointId) -> Option<NearbyEvent> {
        self.endpoints.remove(endpoint_id).map(|endpoint| {
            debug!("Lost endpoint {}", endpoint.id);
            NearbyEvent::EndpointLost {
                endpoint_id: endpoint.id,
            }
        })
    }

    /// Forget every endpoint without per-endpoint events; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let count = self.endpoints.len();
        self.endpoints.clear();
        count
    }

    pub fn get(&self, endpoint_id: &EndpointId) -> Option<&Endpoint> {
        self.endpoints.get(endpoint_id)
    }

    pub fn contains(&self, endpoint_id: &EndpointId) -> bool {
        self.endpoints.contains_key(endpoint_id)
    }

    pub fn display_name(&self, endpoint_id: &EndpointId) -> Option<String> {
        self.endpoints
            .get(endpoint_id)
            .map(|endpoint| endpoint.display_name.clone())
    }

    /// Snapshot of all known endpoints, ordered by id
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.endpoints.values().cloned().collect();
        endpoints.sort_by(|a, b| a.id.cmp(&b.id));
        endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
