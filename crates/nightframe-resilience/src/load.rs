//! Load sampling feeding the degradation controller.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sysinfo::System;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::degradation::{DegradationController, LoadSample};
use crate::rate_limit::RateLimiter;

/// Source of load samples.
pub trait LoadSource: Send + 'static {
    /// Takes one sample given the caller's current queue depth.
    fn sample(&mut self, queue_depth: usize) -> LoadSample;
}

/// Samples CPU and memory utilisation of the host.
///
/// CPU is estimated from the one-minute load average relative to the core
/// count, capped at 100%.
#[derive(Debug)]
pub struct SystemLoadSampler {
    sys: System,
}

impl Default for SystemLoadSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemLoadSampler {
    /// Creates a sampler with a fully refreshed system view.
    #[must_use]
    pub fn new() -> Self {
        let mut sys = System::new_all();
        sys.refresh_all();
        Self { sys }
    }
}

impl LoadSource for SystemLoadSampler {
    fn sample(&mut self, queue_depth: usize) -> LoadSample {
        self.sys.refresh_memory();

        let cpu_count = self.sys.cpus().len().max(1) as f64;
        let load = System::load_average();
        let cpu_percent = ((load.one / cpu_count) * 100.0).clamp(0.0, 100.0) as f32;

        let total = self.sys.total_memory();
        let memory_percent = if total > 0 {
            (self.sys.used_memory() as f64 / total as f64 * 100.0) as f32
        } else {
            0.0
        };

        LoadSample::new(queue_depth, cpu_percent, memory_percent)
    }
}

/// Periodically samples load and updates the controller.
///
/// When a limiter is supplied its effective limit follows the level.
pub fn spawn_load_monitor<S: LoadSource>(
    mut source: S,
    controller: Arc<DegradationController>,
    limiter: Option<Arc<RateLimiter>>,
    queue_depth: Arc<AtomicUsize>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let sample = source.sample(queue_depth.load(Ordering::Relaxed));
            let level = controller.update(&sample);
            if let Some(limiter) = &limiter {
                limiter.adapt_to(level);
            }
            debug!(%level, queue_depth = sample.queue_depth, "load sampled");
        }
    })
}
