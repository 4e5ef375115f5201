//! Runtime configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{NearbyError, Result};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for a nearby connections instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NearbyConfig {
    /// Event bus capacity per subscriber before the slowest one starts lagging
    pub event_buffer_size: usize,
    /// Refuse connection requests to endpoints that were never discovered
    pub require_discovered_endpoint: bool,
    /// Fail start commands with `AlreadyActive` instead of treating them as no-ops
    pub strict_activation: bool,
    /// Number of lifecycle transitions kept for inspection
    pub audit_trail_limit: usize,
    /// How long terminal connection records stay queryable without acknowledgement
    pub terminal_retention: Duration,
    /// How often expired terminal records are swept
    pub sweep_interval: Duration,
}

impl Default for NearbyConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 256,
            terminal_retention: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(5),
            require_discovered_endpoint: true,
            strict_activation: false,
            audit_trail_limit: 1000,
        }
    }
}

impl NearbyConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration optimized for testing: short retention, fast sweeps
    pub fn testing() -> Self {
        Self {
            event_buffer_size: 1024,
            terminal_retention: Duration::from_millis(200),
            sweep_interval: Duration::from_millis(20),
            require_discovered_endpoint: true,
            strict_activation: false,
            audit_trail_limit: 100,
        }
    }

    pub fn with_event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = size;
        self
    }

    pub fn with_terminal_retention(mut self, retention: Duration) -> Self {
        self.terminal_retention = retention;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_require_discovered_endpoint(mut self, required: bool) -> Self {
        self.require_discovered_endpoint = required;
        self
    }

    pub fn with_strict_activation(mut self, strict: bool) -> Self {
        self.strict_activation = strict;
        self
    }

    pub fn with_audit_trail_limit(mut self, limit: usize) -> Self {
        self.audit_trail_limit = limit;
        self
    }

    /// Reject values the runtime cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.event_buffer_size == 0 {
            return Err(NearbyError::InvalidConfiguration {
                reason: "event_buffer_size must be greater than zero".to_string(),
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(NearbyError::InvalidConfiguration {
                reason: "sweep_interval must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}
