//! Coordinator configuration.

use std::time::Duration;

use crate::error::{ReloadError, Result};

/// Configuration for a [`crate::HotReloadCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadConfig {
    /// Maximum number of queued updates.
    pub queue_capacity: usize,
    /// Simulated time spent integrating an update.
    pub integration_delay: Duration,
    /// Simulated time spent validating an update.
    pub validation_delay: Duration,
    /// Applied updates kept in history; the oldest are dropped first.
    pub history_capacity: usize,
    /// Capacity of the event channel.
    pub event_capacity: usize,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            integration_delay: Duration::from_millis(100),
            validation_delay: Duration::from_millis(50),
            history_capacity: 1000,
            event_capacity: 256,
        }
    }
}

impl ReloadConfig {
    /// Sets the queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets both simulated delays.
    #[must_use]
    pub const fn with_delays(mut self, integration: Duration, validation: Duration) -> Self {
        self.integration_delay = integration;
        self.validation_delay = validation;
        self
    }

    /// Sets the history capacity.
    #[must_use]
    pub const fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError::Config`] if a capacity is zero.
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(ReloadError::Config("queue_capacity must be at least 1".into()));
        }
        if self.history_capacity == 0 {
            return Err(ReloadError::Config(
                "history_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
