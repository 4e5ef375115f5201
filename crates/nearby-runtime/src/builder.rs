//! Runtime Builder API
//!
//! Assembles the shared state, starts the notification dispatcher and hands
//! back the command facade.

use std::sync::Arc;

use nearby_core::{NearbyConfig, NotificationStream, Result, SystemTimeSource, TimeSource, TransportProvider};
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::facade::NearbyConnections;
use crate::shared::Shared;

// ----------------------------------------------------------------------------
// Builder
// ----------------------------------------------------------------------------

/// Builder for a [`NearbyConnections`] instance
#[derive(Debug)]
pub struct NearbyBuilder {
    config: NearbyConfig,
    time_source: Arc<dyn TimeSource>,
}

impl Default for NearbyBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NearbyBuilder {
    pub fn new() -> Self {
        Self {
            config: NearbyConfig::default(),
            time_source: Arc::new(SystemTimeSource::new()),
        }
    }

    pub fn with_config(mut self, config: NearbyConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the wall clock, e.g. with a manually advanced one in tests
    pub fn with_time_source(mut self, time_source: impl TimeSource + 'static) -> Self {
        self.time_source = Arc::new(time_source);
        self
    }

    /// Validate the configuration and start the instance
    ///
    /// `notifications` must be the stream `provider` reports into. Must be
    /// called from within a tokio runtime.
    pub fn start<P: TransportProvider>(
        self,
        provider: P,
        notifications: NotificationStream,
    ) -> Result<NearbyConnections<P>> {
        self.config.validate()?;

        let shared = Arc::new(Shared::new(self.config, self.time_source));
        let dispatcher = Dispatcher::new(Arc::clone(&shared), notifications).spawn();

        info!("Nearby connections started");
        Ok(NearbyConnections::new(provider, shared, dispatcher))
    }
}
