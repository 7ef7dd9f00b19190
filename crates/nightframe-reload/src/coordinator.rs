//! The hot reload coordinator.
//!
//! Updates are queued from any task and applied strictly one at a time by a
//! dedicated worker task: announce, integrate, validate, commit. Enqueueing
//! never waits, and the worker only ever sleeps, so the rest of the process
//! keeps running while an update is in flight.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReloadConfig;
use crate::error::{ReloadError, Result};
use crate::types::{AppliedUpdate, ReloadEvent, UpdateDescriptor};

#[derive(Debug)]
struct Shared {
    config: ReloadConfig,
    applied: RwLock<VecDeque<AppliedUpdate>>,
    applied_ids: RwLock<HashSet<String>>,
    pending: AtomicUsize,
    events: broadcast::Sender<ReloadEvent>,
}

impl Shared {
    fn emit(&self, event: ReloadEvent) {
        let _ = self.events.send(event);
    }

    fn reject(&self, id: &str, reason: String) {
        warn!(update = %id, %reason, "update rejected");
        self.emit(ReloadEvent::Rejected {
            id: id.to_string(),
            reason,
        });
    }
}

/// Applies queued updates sequentially on its own task.
#[derive(Debug)]
pub struct HotReloadCoordinator {
    tx: mpsc::Sender<UpdateDescriptor>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl HotReloadCoordinator {
    /// Starts a coordinator and its worker task.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ReloadError::Config`] if the configuration is invalid.
    pub fn start(config: ReloadConfig) -> Result<Self> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let shared = Arc::new(Shared {
            config,
            applied: RwLock::new(VecDeque::new()),
            applied_ids: RwLock::new(HashSet::new()),
            pending: AtomicUsize::new(0),
            events,
        });
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_worker(Arc::clone(&shared), rx, cancel.clone()));

        info!(
            capacity = shared.config.queue_capacity,
            "hot reload coordinator started"
        );
        Ok(Self {
            tx,
            shared,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Queues an update without waiting.
    ///
    /// # Errors
    ///
    /// - [`ReloadError::InvalidDescriptor`] if the descriptor fails its sanity
    ///   check; a `Rejected` event is also published.
    /// - [`ReloadError::QueueFull`] if the queue is at capacity.
    /// - [`ReloadError::Closed`] after shutdown.
    pub fn enqueue(&self, descriptor: UpdateDescriptor) -> Result<()> {
        if let Err(e) = descriptor.validate() {
            self.shared.reject(&descriptor.id, e.to_string());
            return Err(e);
        }
        if self.cancel.is_cancelled() {
            return Err(ReloadError::Closed);
        }

        let id = descriptor.id.clone();
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(descriptor) {
            Ok(()) => {
                debug!(update = %id, "update queued");
                Ok(())
            }
            Err(e) => {
                self.shared.pending.fetch_sub(1, Ordering::SeqCst);
                match e {
                    mpsc::error::TrySendError::Full(_) => Err(ReloadError::QueueFull {
                        capacity: self.shared.config.queue_capacity,
                    }),
                    mpsc::error::TrySendError::Closed(_) => Err(ReloadError::Closed),
                }
            }
        }
    }

    /// Updates queued or in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Applied updates, oldest first.
    #[must_use]
    pub fn applied(&self) -> Vec<AppliedUpdate> {
        self.shared.applied.read().iter().cloned().collect()
    }

    /// Whether an update with this id has been committed.
    #[must_use]
    pub fn is_applied(&self, id: &str) -> bool {
        self.shared.applied_ids.read().contains(id)
    }

    /// Subscribes to pipeline events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.shared.events.subscribe()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ReloadConfig {
        &self.shared.config
    }

    /// Stops the worker and waits for it to exit.
    ///
    /// An update that is mid-pipeline is abandoned without being committed.
    /// Queued updates are dropped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "reload worker ended abnormally");
            }
        }
        info!("hot reload coordinator stopped");
    }
}

impl Drop for HotReloadCoordinator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_worker(
    shared: Arc<Shared>,
    mut rx: mpsc::Receiver<UpdateDescriptor>,
    cancel: CancellationToken,
) {
    loop {
        let descriptor = tokio::select! {
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(descriptor) => descriptor,
                None => break,
            },
        };

        let id = descriptor.id.clone();
        let finished = apply(&shared, descriptor, &cancel).await;
        shared.pending.fetch_sub(1, Ordering::SeqCst);
        if !finished {
            debug!(update = %id, "update abandoned on shutdown");
            break;
        }
    }
    rx.close();
    let mut dropped = 0usize;
    while rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        shared.pending.fetch_sub(dropped, Ordering::SeqCst);
        debug!(dropped, "queued updates dropped on shutdown");
    }
    debug!("reload worker exiting");
}

/// Runs one update through the pipeline. Returns `false` if cancelled.
async fn apply(shared: &Shared, descriptor: UpdateDescriptor, cancel: &CancellationToken) -> bool {
    let started = Instant::now();
    let id = descriptor.id.clone();

    info!(
        update = %id,
        component = %descriptor.component,
        version = %descriptor.version,
        "applying update"
    );
    shared.emit(ReloadEvent::Announced {
        id: id.clone(),
        component: descriptor.component.clone(),
        version: descriptor.version.clone(),
    });

    if shared.applied_ids.read().contains(&id) {
        shared.reject(&id, "already applied".into());
        return true;
    }

    shared.emit(ReloadEvent::Integrating { id: id.clone() });
    if !pause(shared.config.integration_delay, cancel).await {
        return false;
    }

    shared.emit(ReloadEvent::Validating { id: id.clone() });
    if !pause(shared.config.validation_delay, cancel).await {
        return false;
    }

    let applied_at = Utc::now();
    let took = started.elapsed();
    {
        let mut applied = shared.applied.write();
        if applied.len() >= shared.config.history_capacity {
            if let Some(evicted) = applied.pop_front() {
                shared.applied_ids.write().remove(&evicted.descriptor.id);
            }
        }
        shared.applied_ids.write().insert(id.clone());
        applied.push_back(AppliedUpdate {
            descriptor,
            applied_at,
            took,
        });
    }

    info!(update = %id, ?took, "update committed");
    shared.emit(ReloadEvent::Committed { id, applied_at });
    true
}

async fn pause(delay: std::time::Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(delay) => true,
    }
}
