//! Bounded resource pools per resource class.
//!
//! Slots are counting-semaphore permits wrapped in [`PoolPermit`]; a slot is
//! returned when its permit drops, so every exit path releases it, including
//! an error, a panic unwinding through the holder, or a cancelled future.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{ResilienceError, Result};

/// Kind of resource a pool slot represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    /// Outbound network operations.
    Network,
    /// File handles and disk I/O.
    File,
    /// CPU-heavy work.
    Cpu,
}

impl ResourceClass {
    /// All classes.
    pub const ALL: [Self; 3] = [Self::Network, Self::File, Self::Cpu];

    const fn index(self) -> usize {
        match self {
            Self::Network => 0,
            Self::File => 1,
            Self::Cpu => 2,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::File => write!(f, "file"),
            Self::Cpu => write!(f, "cpu"),
        }
    }
}

/// Slot counts per class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Concurrent network operations.
    pub network: usize,
    /// Concurrent file operations.
    pub file: usize,
    /// Concurrent CPU-heavy operations.
    pub cpu: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            network: 10,
            file: 5,
            cpu: 4,
        }
    }
}

impl PoolConfig {
    /// Sets the network slot count.
    #[must_use]
    pub const fn with_network(mut self, slots: usize) -> Self {
        self.network = slots;
        self
    }

    /// Sets the file slot count.
    #[must_use]
    pub const fn with_file(mut self, slots: usize) -> Self {
        self.file = slots;
        self
    }

    /// Sets the CPU slot count.
    #[must_use]
    pub const fn with_cpu(mut self, slots: usize) -> Self {
        self.cpu = slots;
        self
    }

    const fn slots(&self, class: ResourceClass) -> usize {
        match class {
            ResourceClass::Network => self.network,
            ResourceClass::File => self.file,
            ResourceClass::Cpu => self.cpu,
        }
    }
}

/// A held pool slot. The slot is released on drop.
#[derive(Debug)]
pub struct PoolPermit {
    class: ResourceClass,
    _permit: OwnedSemaphorePermit,
}

impl PoolPermit {
    /// The class this slot belongs to.
    #[must_use]
    pub const fn class(&self) -> ResourceClass {
        self.class
    }
}

impl Drop for PoolPermit {
    fn drop(&mut self) {
        trace!(class = %self.class, "pool slot released");
    }
}

/// Per-class bounded pools.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    config: PoolConfig,
    semaphores: [Arc<Semaphore>; 3],
}

impl Default for ResourcePool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl ResourcePool {
    /// Creates pools sized by `config`. A class configured with zero slots
    /// gets one, so acquisition can never deadlock by construction.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let make = |class| Arc::new(Semaphore::new(config.slots(class).max(1)));
        Self {
            config,
            semaphores: [
                make(ResourceClass::Network),
                make(ResourceClass::File),
                make(ResourceClass::Cpu),
            ],
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Configured slot count for a class.
    #[must_use]
    pub fn capacity(&self, class: ResourceClass) -> usize {
        self.config.slots(class).max(1)
    }

    /// Currently free slots for a class.
    #[must_use]
    pub fn available(&self, class: ResourceClass) -> usize {
        self.semaphore(class).available_permits()
    }

    /// Waits for a slot.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::PoolClosed`] if the pool was closed.
    pub async fn acquire(&self, class: ResourceClass) -> Result<PoolPermit> {
        let permit = Arc::clone(self.semaphore(class))
            .acquire_owned()
            .await
            .map_err(|_| ResilienceError::PoolClosed { class })?;
        debug!(%class, available = self.available(class), "pool slot acquired");
        Ok(PoolPermit {
            class,
            _permit: permit,
        })
    }

    /// Takes a slot if one is free right now.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::PoolClosed`] if the pool was closed.
    pub fn try_acquire(&self, class: ResourceClass) -> Result<Option<PoolPermit>> {
        match Arc::clone(self.semaphore(class)).try_acquire_owned() {
            Ok(permit) => Ok(Some(PoolPermit {
                class,
                _permit: permit,
            })),
            Err(TryAcquireError::NoPermits) => Ok(None),
            Err(TryAcquireError::Closed) => Err(ResilienceError::PoolClosed { class }),
        }
    }

    /// Waits for a slot until `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::Cancelled`] on cancellation or
    /// [`ResilienceError::PoolClosed`] if the pool was closed.
    pub async fn acquire_cancellable(
        &self,
        class: ResourceClass,
        cancel: &CancellationToken,
    ) -> Result<PoolPermit> {
        tokio::select! {
            () = cancel.cancelled() => Err(ResilienceError::Cancelled),
            permit = self.acquire(class) => permit,
        }
    }

    /// Waits for a slot for at most `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::AcquireTimeout`] when the wait expires.
    pub async fn acquire_timeout(&self, class: ResourceClass, timeout: Duration) -> Result<PoolPermit> {
        tokio::time::timeout(timeout, self.acquire(class))
            .await
            .map_err(|_| ResilienceError::AcquireTimeout {
                class,
                waited: timeout,
            })?
    }

    /// Runs `op` while holding a slot of `class`.
    ///
    /// # Errors
    ///
    /// Returns acquisition errors, or [`ResilienceError::Operation`] carrying
    /// the operation's own error. The slot is released either way.
    pub async fn guard<F, Fut, T, E>(
        &self,
        class: ResourceClass,
        op: F,
        cancel: &CancellationToken,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        let permit = self.acquire_cancellable(class, cancel).await?;
        let outcome = tokio::select! {
            () = cancel.cancelled() => Err(ResilienceError::Cancelled),
            result = op() => result.map_err(|e| ResilienceError::Operation(e.to_string())),
        };
        drop(permit);
        outcome
    }

    /// Closes every class; pending and future acquisitions fail.
    pub fn close(&self) {
        for semaphore in &self.semaphores {
            semaphore.close();
        }
    }

    fn semaphore(&self, class: ResourceClass) -> &Arc<Semaphore> {
        &self.semaphores[class.index()]
    }
}
