//! Heartbeat-based liveness detection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::{EventBus, GovernorEvent};

/// Configuration for a [`LivenessTimer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivenessConfig {
    /// Silence longer than this is reported as a stall.
    pub timeout: Duration,
    /// How often the background checker looks at the gap.
    pub check_interval: Duration,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            check_interval: Duration::from_secs(5),
        }
    }
}

impl LivenessConfig {
    /// Sets the stall timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the check interval.
    #[must_use]
    pub const fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }
}

/// Tracks the last heartbeat and reports stalls.
///
/// When a stall is reported the timer restarts its own clock, so one stall
/// produces one event rather than one per check.
#[derive(Debug)]
pub struct LivenessTimer {
    config: LivenessConfig,
    last_beat: Mutex<Instant>,
    timeouts: AtomicU64,
    events: Option<EventBus>,
}

impl LivenessTimer {
    /// Creates a timer whose clock starts now.
    #[must_use]
    pub fn new(config: LivenessConfig) -> Self {
        Self {
            config,
            last_beat: Mutex::new(Instant::now()),
            timeouts: AtomicU64::new(0),
            events: None,
        }
    }

    /// Publishes timeouts on the given bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &LivenessConfig {
        &self.config
    }

    /// Records a heartbeat.
    pub fn heartbeat(&self) {
        *self.last_beat.lock() = Instant::now();
    }

    /// Time since the last heartbeat (or since the last reported stall).
    #[must_use]
    pub fn silent_for(&self) -> Duration {
        Instant::now().saturating_duration_since(*self.last_beat.lock())
    }

    /// Number of stalls reported so far.
    #[must_use]
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::SeqCst)
    }

    /// Checks the gap once; reports and resets when it exceeds the timeout.
    ///
    /// Returns the observed gap when a stall was reported.
    pub fn check(&self) -> Option<Duration> {
        let mut last = self.last_beat.lock();
        let now = Instant::now();
        let gap = now.saturating_duration_since(*last);
        if gap <= self.config.timeout {
            return None;
        }

        *last = now;
        drop(last);

        self.timeouts.fetch_add(1, Ordering::SeqCst);
        warn!(silent_for = ?gap, timeout = ?self.config.timeout, "liveness timeout");
        if let Some(events) = &self.events {
            events.emit(GovernorEvent::LivenessTimeout { silent_for: gap });
        }
        Some(gap)
    }

    /// Starts the background checker.
    pub fn spawn_checker(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let timer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(timer.config.check_interval);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        timer.check();
                    }
                }
            }
        })
    }
}

impl Default for LivenessTimer {
    fn default() -> Self {
        Self::new(LivenessConfig::default())
    }
}
