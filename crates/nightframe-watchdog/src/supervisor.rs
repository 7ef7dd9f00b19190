//! Update supervisor.
//!
//! Keeps one child binary running and swaps it for a verified replacement
//! when an update marker appears next to it. The update sequence is
//!
//! 1. copy the candidate to a private staging file and check that copy's
//!    SHA-256 against the digest in the marker,
//! 2. give the child a grace period to drain,
//! 3. kill the child's process tree and wait for it to exit,
//! 4. back up the current binary,
//! 5. rename the staged copy over the binary (restoring the backup on failure),
//! 6. remove the marker and relaunch.
//!
//! Only the staged bytes that were hashed are ever installed, so later writes
//! to the candidate cannot slip in unverified code. Verification happens
//! before anything destructive, and a mismatch only discards the marker. A
//! child that will not exit postpones the update until the next poll. No step
//! failure ends the loop; only cancellation does.

use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WatchdogConfig;
use crate::digest;
use crate::error::{Result, WatchdogError};
use crate::lock::InstanceLock;
use crate::process::SupervisedProcess;

const EVENT_CAPACITY: usize = 64;

/// Where the supervisor is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    /// Waiting for the binary to appear.
    NoBinary,
    /// Launching the child.
    Starting,
    /// Child is running.
    Running,
    /// An update marker was found.
    UpdateDetected,
    /// Waiting for the child to finish in-flight work.
    Draining,
    /// Killing the child's process tree.
    Terminating,
    /// Copying the current binary aside.
    BackingUp,
    /// Moving the candidate into place.
    Installing,
    /// Restoring the backup after a failed install.
    RollingBack,
    /// Update sequence finished.
    Done,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoBinary => "no_binary",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::UpdateDetected => "update_detected",
            Self::Draining => "draining",
            Self::Terminating => "terminating",
            Self::BackingUp => "backing_up",
            Self::Installing => "installing",
            Self::RollingBack => "rolling_back",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// Notifications published by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// State transition.
    StateChanged {
        /// Previous state.
        from: SupervisorState,
        /// New state.
        to: SupervisorState,
    },
    /// A child was launched.
    ChildStarted {
        /// Child pid.
        pid: u32,
    },
    /// A child exited on its own.
    ChildExited {
        /// Child pid.
        pid: u32,
        /// Exit code, if it exited normally.
        code: Option<i32>,
    },
    /// A verified candidate was installed.
    UpdateApplied {
        /// Hex digest of the installed binary.
        digest: String,
    },
    /// An update was refused and its marker discarded.
    UpdateRejected {
        /// Why the update was refused.
        reason: String,
    },
    /// Install failed and the backup was restored.
    RolledBack {
        /// The install error.
        reason: String,
    },
}

/// Point-in-time view of the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    /// Current state.
    pub state: SupervisorState,
    /// Pid of the running child.
    pub child_pid: Option<u32>,
    /// Digest of the binary the child was launched from.
    pub installed_digest: Option<String>,
    /// Launches after the first one.
    pub restarts: u64,
    /// Updates installed.
    pub updates_applied: u64,
    /// Updates refused.
    pub updates_rejected: u64,
}

impl Default for SupervisorStatus {
    fn default() -> Self {
        Self {
            state: SupervisorState::NoBinary,
            child_pid: None,
            installed_digest: None,
            restarts: 0,
            updates_applied: 0,
            updates_rejected: 0,
        }
    }
}

/// Supervises one binary.
#[derive(Debug)]
pub struct UpdateSupervisor {
    config: WatchdogConfig,
    status: Mutex<SupervisorStatus>,
    launches: Mutex<u64>,
    events: broadcast::Sender<SupervisorEvent>,
}

impl UpdateSupervisor {
    /// Creates a supervisor.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::Config`] if the configuration is invalid.
    pub fn new(config: WatchdogConfig) -> Result<Self> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config,
            status: Mutex::new(SupervisorStatus::default()),
            launches: Mutex::new(0),
            events,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Subscribes to supervisor events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> SupervisorStatus {
        self.status.lock().clone()
    }

    /// Runs the supervision loop until `cancel` fires.
    ///
    /// The instance lock is retried every poll while it cannot be created,
    /// for example because the binary's directory does not exist yet. On
    /// cancellation the child's process tree is killed and reaped before
    /// this returns.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::AlreadyRunning`] if another supervisor owns
    /// the binary. Nothing else inside the loop is fatal.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        info!(
            binary = %self.config.binary.display(),
            signal = %self.config.signal_path().display(),
            interval = ?self.config.poll_interval(),
            "supervisor started"
        );

        let mut lock: Option<InstanceLock> = None;
        let mut child: Option<SupervisedProcess> = None;
        while !cancel.is_cancelled() {
            if lock.is_none() {
                lock = self.try_lock()?;
            }
            if lock.is_some() {
                self.poll(&mut child, &cancel).await;
            }

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(self.config.poll_interval()) => {}
            }
        }

        info!("supervisor shutting down");
        if let Err(e) = self.stop_child(&mut child).await {
            error!(error = %e, "child did not exit on shutdown");
        }
        self.update_status(|s| s.child_pid = None);
        Ok(())
    }

    fn try_lock(&self) -> Result<Option<InstanceLock>> {
        let path = self.config.lock_path();
        match InstanceLock::acquire(&path) {
            Ok(lock) => Ok(Some(lock)),
            Err(e @ WatchdogError::AlreadyRunning { .. }) => Err(e),
            Err(e) => {
                self.transition(SupervisorState::NoBinary);
                warn!(lock = %path.display(), error = %e, "instance lock unavailable, retrying");
                Ok(None)
            }
        }
    }

    async fn poll(&self, child: &mut Option<SupervisedProcess>, cancel: &CancellationToken) {
        self.reap_exited(child);

        if child.is_none() {
            if !self.config.binary.exists() {
                self.transition(SupervisorState::NoBinary);
                debug!(binary = %self.config.binary.display(), "waiting for binary");
                return;
            }
            self.launch(child).await;
        }

        if self.config.signal_path().exists() {
            self.handle_update(child, cancel).await;
        }
    }

    fn reap_exited(&self, child: &mut Option<SupervisedProcess>) {
        let Some(process) = child.as_mut() else {
            return;
        };
        match process.try_exited() {
            Ok(Some(status)) => {
                let pid = process.pid();
                warn!(pid, %status, "child exited");
                self.emit(SupervisorEvent::ChildExited {
                    pid,
                    code: status.code(),
                });
                self.update_status(|s| s.child_pid = None);
                *child = None;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "failed to query child status"),
        }
    }

    async fn launch(&self, child: &mut Option<SupervisedProcess>) {
        self.transition(SupervisorState::Starting);

        let binary = self.config.binary.clone();
        let digest = hash_file(binary.clone()).await.ok();

        match SupervisedProcess::spawn(&binary, &self.config.args, digest.clone()) {
            Ok(process) => {
                let pid = process.pid();
                let restarts = {
                    let mut launches = self.launches.lock();
                    *launches += 1;
                    launches.saturating_sub(1)
                };
                self.update_status(|s| {
                    s.child_pid = Some(pid);
                    s.installed_digest = digest;
                    s.restarts = restarts;
                });
                self.emit(SupervisorEvent::ChildStarted { pid });
                *child = Some(process);
                self.transition(SupervisorState::Running);
            }
            Err(e) => {
                error!(error = %e, "failed to launch child");
            }
        }
    }

    async fn handle_update(&self, child: &mut Option<SupervisedProcess>, cancel: &CancellationToken) {
        self.transition(SupervisorState::UpdateDetected);
        let signal = self.config.signal_path();
        let candidate = self.config.candidate_path();
        let staged = self.config.staged_path();
        info!(candidate = %candidate.display(), "update signal detected");

        if !candidate.exists() {
            self.reject(&signal, "candidate binary missing".to_string());
            self.return_to_running(child);
            return;
        }

        let verified = match stage_candidate(&signal, &candidate, &staged).await {
            Ok(digest) => digest,
            Err(e) => {
                remove_if_present(&staged);
                self.reject(&signal, e.to_string());
                self.return_to_running(child);
                return;
            }
        };
        info!(digest = %verified, staged = %staged.display(), "candidate verified");

        self.transition(SupervisorState::Draining);
        tokio::select! {
            () = cancel.cancelled() => {
                info!("drain interrupted by shutdown");
                remove_if_present(&staged);
                return;
            }
            () = tokio::time::sleep(self.config.drain_grace()) => {}
        }

        self.transition(SupervisorState::Terminating);
        if let Err(e) = self.stop_child(child).await {
            self.postpone_update(child, &staged, &e);
            return;
        }

        self.transition(SupervisorState::BackingUp);
        let backup = self.config.backup_path();
        let backed_up = match std::fs::copy(&self.config.binary, &backup) {
            Ok(_) => true,
            Err(e) => {
                warn!(backup = %backup.display(), error = %e, "backup failed, continuing");
                false
            }
        };

        self.transition(SupervisorState::Installing);
        match install(&staged, &self.config.binary) {
            Ok(()) => {
                info!(binary = %self.config.binary.display(), digest = %verified, "update installed");
                remove_if_present(&candidate);
                self.update_status(|s| s.updates_applied += 1);
                self.emit(SupervisorEvent::UpdateApplied { digest: verified });
            }
            Err(e) => {
                error!(error = %e, "install failed");
                remove_if_present(&staged);
                self.transition(SupervisorState::RollingBack);
                if backed_up {
                    match std::fs::copy(&backup, &self.config.binary) {
                        Ok(_) => {
                            warn!("backup restored");
                            self.emit(SupervisorEvent::RolledBack {
                                reason: e.to_string(),
                            });
                        }
                        Err(restore) => {
                            error!(error = %restore, "rollback failed, relaunching whatever is on disk");
                        }
                    }
                } else {
                    error!("no backup to restore");
                }
            }
        }

        self.transition(SupervisorState::Done);
        remove_if_present(&signal);

        if self.config.binary.exists() {
            self.launch(child).await;
        }
    }

    /// Kills the child's tree. On failure the child is kept so it is still
    /// tracked and reaped later.
    async fn stop_child(&self, child: &mut Option<SupervisedProcess>) -> Result<()> {
        if let Some(process) = child.as_mut() {
            let pid = process.pid();
            if let Err(e) = process.kill_tree(self.config.kill_timeout()).await {
                error!(pid, error = %e, "failed to terminate child");
                return Err(e);
            }
        }
        *child = None;
        self.update_status(|s| s.child_pid = None);
        Ok(())
    }

    /// Leaves the marker in place so the update is retried on the next poll.
    fn postpone_update(&self, child: &Option<SupervisedProcess>, staged: &Path, reason: &WatchdogError) {
        warn!(error = %reason, "update postponed, child still running");
        remove_if_present(staged);
        self.return_to_running(child);
    }

    fn reject(&self, signal: &Path, reason: String) {
        warn!(%reason, "update rejected");
        remove_if_present(signal);
        self.update_status(|s| s.updates_rejected += 1);
        self.emit(SupervisorEvent::UpdateRejected { reason });
    }

    fn return_to_running(&self, child: &Option<SupervisedProcess>) {
        if child.is_some() {
            self.transition(SupervisorState::Running);
        }
    }

    fn transition(&self, to: SupervisorState) {
        let from = {
            let mut status = self.status.lock();
            let from = status.state;
            status.state = to;
            from
        };
        if from != to {
            info!(%from, %to, "supervisor state changed");
            self.emit(SupervisorEvent::StateChanged { from, to });
        }
    }

    fn update_status(&self, f: impl FnOnce(&mut SupervisorStatus)) {
        f(&mut self.status.lock());
    }

    fn emit(&self, event: SupervisorEvent) {
        let _ = self.events.send(event);
    }
}

async fn hash_file(path: PathBuf) -> Result<String> {
    tokio::task::spawn_blocking(move || digest::file_digest_hex(&path))
        .await
        .map_err(|e| WatchdogError::Io(std::io::Error::other(e)))?
}

/// Copies the candidate to `staged` and checks the copy against the digest
/// in `signal`. Returns the verified hex digest.
async fn stage_candidate(signal: &Path, candidate: &Path, staged: &Path) -> Result<String> {
    let expected = digest::expected_from_signal(signal)?;
    let candidate = candidate.to_path_buf();
    let staged = staged.to_path_buf();
    tokio::task::spawn_blocking(move || {
        std::fs::copy(&candidate, &staged)?;
        digest::verify(&staged, &expected)
    })
    .await
    .map_err(|e| WatchdogError::Io(std::io::Error::other(e)))?
}

/// Moves `staged` over `target`, marking it executable first on Unix.
fn install(staged: &Path, target: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(staged, std::fs::Permissions::from_mode(0o755))?;
    }
    std::fs::rename(staged, target)
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
