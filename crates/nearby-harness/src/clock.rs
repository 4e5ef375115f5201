//! Manually advanced time source

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nearby_core::{TimeSource, Timestamp};

/// Time source for deterministic tests
///
/// Clones share the same underlying time, so a test can keep one handle and
/// give another to the runtime.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    current_time: Arc<AtomicU64>,
}

impl ManualClock {
    /// Create a clock starting at time 0
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_at(start_millis: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_millis)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.current_time
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.current_time.store(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}
