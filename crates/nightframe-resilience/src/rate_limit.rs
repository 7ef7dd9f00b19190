//! Fixed-window rate limiting with a runtime-adjustable limit.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::degradation::DegradationLevel;
use crate::error::{ResilienceError, Result};
use crate::events::{EventBus, GovernorEvent};

/// Smallest limit the limiter accepts.
pub const MIN_LIMIT: u32 = 1;
/// Largest limit the limiter accepts.
pub const MAX_LIMIT: u32 = 100;

/// Configuration for a [`RateLimiter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Attempts allowed per window.
    pub limit: u32,
    /// Window length.
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 20,
            window: Duration::from_secs(1),
        }
    }
}

impl RateLimitConfig {
    /// Sets the per-window limit (clamped when the limiter is built).
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Sets the window length.
    #[must_use]
    pub const fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The attempt may proceed.
    Allowed,
    /// The attempt is denied; wait before trying again.
    Denied {
        /// Time until the current window resets.
        retry_after: Duration,
    },
}

impl RateDecision {
    /// Returns true if the attempt was allowed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u32,
}

/// Fixed-window counter limiter.
///
/// The window resets wholesale once its length has elapsed; within a window
/// at most `limit` attempts succeed. The base limit is remembered so the
/// limiter can scale down under load and recover afterwards.
#[derive(Debug)]
pub struct RateLimiter {
    window_len: Duration,
    base_limit: AtomicU32,
    limit: AtomicU32,
    window: Mutex<Window>,
    events: Option<EventBus>,
}

impl RateLimiter {
    /// Creates a limiter from configuration.
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        let limit = clamp_limit(config.limit);
        Self {
            window_len: if config.window.is_zero() {
                Duration::from_secs(1)
            } else {
                config.window
            },
            base_limit: AtomicU32::new(limit),
            limit: AtomicU32::new(limit),
            window: Mutex::new(Window {
                start: Instant::now(),
                count: 0,
            }),
            events: None,
        }
    }

    /// Creates a limiter with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(&RateLimitConfig::default())
    }

    /// Publishes limit adjustments on the given bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Current per-window limit.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.load(Ordering::SeqCst)
    }

    /// Limit configured before any load-based scaling.
    #[must_use]
    pub fn base_limit(&self) -> u32 {
        self.base_limit.load(Ordering::SeqCst)
    }

    /// Checks and records an attempt.
    pub fn check(&self) -> RateDecision {
        let now = Instant::now();
        let limit = self.limit();
        let mut window = self.window.lock();

        let elapsed = now.saturating_duration_since(window.start);
        if elapsed >= self.window_len {
            window.start = now;
            window.count = 0;
        }

        if window.count < limit {
            window.count += 1;
            RateDecision::Allowed
        } else {
            let retry_after = self
                .window_len
                .saturating_sub(now.saturating_duration_since(window.start));
            debug!(limit, ?retry_after, "rate limit exceeded");
            RateDecision::Denied { retry_after }
        }
    }

    /// Returns true if the attempt is allowed, recording it.
    pub fn allow(&self) -> bool {
        self.check().is_allowed()
    }

    /// Checks and converts a denial into an error.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::RateLimited`] when over the limit.
    pub fn try_acquire(&self) -> Result<()> {
        match self.check() {
            RateDecision::Allowed => Ok(()),
            RateDecision::Denied { retry_after } => Err(ResilienceError::RateLimited { retry_after }),
        }
    }

    /// Waits until an attempt is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::Cancelled`] if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            match self.check() {
                RateDecision::Allowed => return Ok(()),
                RateDecision::Denied { retry_after } => {
                    let wait = retry_after.max(Duration::from_millis(1));
                    tokio::select! {
                        () = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                        () = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// Sets both the base and effective limit, clamped to `[1, 100]`.
    pub fn set_limit(&self, limit: u32) {
        let limit = clamp_limit(limit);
        self.base_limit.store(limit, Ordering::SeqCst);
        self.apply_limit(limit);
    }

    /// Scales the effective limit to the degradation level.
    ///
    /// Normal keeps the base limit; each level above it cuts the allowance
    /// further (3/4, 1/2, 1/4 of the base).
    pub fn adapt_to(&self, level: DegradationLevel) {
        let base = self.base_limit();
        let scaled = match level {
            DegradationLevel::Normal => base,
            DegradationLevel::Reduced => base.saturating_mul(3) / 4,
            DegradationLevel::Minimal => base / 2,
            DegradationLevel::Critical => base / 4,
        };
        self.apply_limit(clamp_limit(scaled));
    }

    fn apply_limit(&self, limit: u32) {
        let previous = self.limit.swap(limit, Ordering::SeqCst);
        if previous != limit {
            info!(from = previous, to = limit, "rate limit adjusted");
            if let Some(events) = &self.events {
                events.emit(GovernorEvent::RateLimitAdjusted {
                    from: previous,
                    to: limit,
                });
            }
        }
    }
}

const fn clamp_limit(limit: u32) -> u32 {
    if limit < MIN_LIMIT {
        MIN_LIMIT
    } else if limit > MAX_LIMIT {
        MAX_LIMIT
    } else {
        limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn limiter(limit: u32) -> RateLimiter {
        RateLimiter::new(&RateLimitConfig::default().with_limit(limit))
    }

    #[test_case(0, 1 ; "zero clamps to one")]
    #[test_case(1, 1 ; "one is kept")]
    #[test_case(50, 50 ; "in range is kept")]
    #[test_case(100, 100 ; "upper bound is kept")]
    #[test_case(500, 100 ; "above range clamps to hundred")]
    fn test_set_limit_clamps(requested: u32, expected: u32) {
        let limiter = limiter(10);
        limiter.set_limit(requested);
        assert_eq!(limiter.limit(), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denies_over_limit_within_window() {
        let limiter = limiter(3);

        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());

        match limiter.check() {
            RateDecision::Denied { retry_after } => {
                assert!(retry_after <= Duration::from_secs(1));
                assert!(retry_after > Duration::ZERO);
            }
            RateDecision::Allowed => panic!("expected denial"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_resets_after_interval() {
        let limiter = limiter(1);
        assert!(limiter.allow());
        assert!(!limiter.allow());

        tokio::time::advance(Duration::from_millis(1001)).await;

        assert!(limiter.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_reports_wait() {
        let limiter = limiter(1);
        assert!(limiter.try_acquire().is_ok());
        assert!(matches!(
            limiter.try_acquire(),
            Err(ResilienceError::RateLimited { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_next_window() {
        let limiter = limiter(1);
        let cancel = CancellationToken::new();

        limiter.acquire(&cancel).await.expect("first");
        let before = Instant::now();
        limiter.acquire(&cancel).await.expect("second");

        assert!(Instant::now() - before >= Duration::from_millis(900));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_cancelled() {
        let limiter = limiter(1);
        let cancel = CancellationToken::new();
        assert!(limiter.allow());

        cancel.cancel();
        assert_eq!(limiter.acquire(&cancel).await, Err(ResilienceError::Cancelled));
    }

    #[test]
    fn test_adapt_to_scales_and_recovers() {
        let limiter = limiter(40);

        limiter.adapt_to(DegradationLevel::Reduced);
        assert_eq!(limiter.limit(), 30);
        limiter.adapt_to(DegradationLevel::Minimal);
        assert_eq!(limiter.limit(), 20);
        limiter.adapt_to(DegradationLevel::Critical);
        assert_eq!(limiter.limit(), 10);
        limiter.adapt_to(DegradationLevel::Normal);
        assert_eq!(limiter.limit(), 40);
        assert_eq!(limiter.base_limit(), 40);
    }

    #[test]
    fn test_adapt_never_drops_below_one() {
        let limiter = limiter(2);
        limiter.adapt_to(DegradationLevel::Critical);
        assert_eq!(limiter.limit(), 1);
    }

    #[test]
    fn test_adjustment_emits_event() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let limiter = limiter(10).with_events(bus);

        limiter.set_limit(5);

        assert_eq!(
            rx.try_recv().expect("event"),
            GovernorEvent::RateLimitAdjusted { from: 10, to: 5 }
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn any_level() -> impl Strategy<Value = DegradationLevel> {
        (0u8..4).prop_map(DegradationLevel::from_u8)
    }

    proptest! {
        #[test]
        fn effective_limit_stays_in_bounds(base in 0u32..10_000, level in any_level()) {
            let limiter = RateLimiter::new(&RateLimitConfig::default().with_limit(base));
            limiter.adapt_to(level);
            prop_assert!((MIN_LIMIT..=MAX_LIMIT).contains(&limiter.limit()));
            prop_assert!(limiter.limit() <= limiter.base_limit());
        }

        #[test]
        fn window_admits_at_most_limit(limit in 1u32..=100, attempts in 0usize..300) {
            let config = RateLimitConfig::default()
                .with_limit(limit)
                .with_window(Duration::from_secs(3600));
            let limiter = RateLimiter::new(&config);
            let admitted = (0..attempts).filter(|_| limiter.allow()).count();
            prop_assert!(admitted <= limit as usize);
            prop_assert_eq!(admitted, attempts.min(limit as usize));
        }
    }
}
