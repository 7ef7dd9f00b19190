//! Bounded retry with linear backoff.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of recent errors kept by a [`RetryExecutor`].
pub const DEFAULT_ERROR_HISTORY: usize = 100;

/// How an operation is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base delay; the wait after attempt `i` is `i * base_delay`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the operation exactly once.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Sets the maximum number of attempts (minimum 1).
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = if attempts == 0 { 1 } else { attempts };
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub const fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Delay to wait after the given 1-based attempt failed.
    #[must_use]
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// One failed attempt kept in the error history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedError {
    /// When the attempt failed.
    pub at: DateTime<Utc>,
    /// 1-based attempt index.
    pub attempt: u32,
    /// Error message.
    pub message: String,
}

/// Runs fallible operations with bounded retries.
///
/// Failures never propagate: after the last attempt the executor returns
/// `None` and the errors are available through [`RetryExecutor::recent_errors`].
#[derive(Debug)]
pub struct RetryExecutor {
    consecutive_failures: AtomicU32,
    errors: Mutex<VecDeque<RecordedError>>,
    error_capacity: usize,
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RetryExecutor {
    /// Creates an executor with the default error history capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_error_capacity(DEFAULT_ERROR_HISTORY)
    }

    /// Creates an executor keeping at most `capacity` recent errors.
    #[must_use]
    pub fn with_error_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            consecutive_failures: AtomicU32::new(0),
            errors: Mutex::new(VecDeque::with_capacity(capacity)),
            error_capacity: capacity,
        }
    }

    /// Failures since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::SeqCst)
    }

    /// Recent errors, oldest first.
    #[must_use]
    pub fn recent_errors(&self) -> Vec<RecordedError> {
        self.errors.lock().iter().cloned().collect()
    }

    /// Runs `op` under `policy`.
    ///
    /// Returns the first successful value, or `None` once attempts are
    /// exhausted.
    pub async fn execute<F, Fut, T, E>(&self, op: F, policy: &RetryPolicy) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.execute_cancellable(op, policy, &CancellationToken::new())
            .await
    }

    /// Like [`RetryExecutor::execute`], but backoff waits end early when
    /// `cancel` fires, in which case `None` is returned.
    pub async fn execute_cancellable<F, Fut, T, E>(
        &self,
        mut op: F,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Option<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let attempts = policy.max_attempts.max(1);

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return None;
            }

            match op().await {
                Ok(value) => {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Some(value);
                }
                Err(e) => {
                    self.consecutive_failures.fetch_add(1, Ordering::SeqCst);
                    self.record_error(attempt, e.to_string());

                    if attempt == attempts {
                        warn!(attempts, error = %e, "operation failed, retries exhausted");
                        break;
                    }

                    let delay = policy.delay_after(attempt);
                    debug!(attempt, ?delay, error = %e, "operation failed, retrying");
                    tokio::select! {
                        () = cancel.cancelled() => return None,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        None
    }

    fn record_error(&self, attempt: u32, message: String) {
        let mut errors = self.errors.lock();
        if errors.len() >= self.error_capacity {
            errors.pop_front();
        }
        errors.push_back(RecordedError {
            at: Utc::now(),
            attempt,
            message,
        });
    }
}
