//! The supervised child process.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use sysinfo::{Pid, ProcessStatus, System};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Result, WatchdogError};

/// A running child owned by the supervisor.
#[derive(Debug)]
pub struct SupervisedProcess {
    child: Child,
    pid: u32,
    binary: PathBuf,
    digest: Option<String>,
}

impl SupervisedProcess {
    /// Starts `binary` with `args`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::Spawn`] if the process cannot be started.
    pub fn spawn(binary: &Path, args: &[String], digest: Option<String>) -> Result<Self> {
        let child = Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| WatchdogError::Spawn {
                binary: binary.to_path_buf(),
                source,
            })?;
        let pid = child.id().unwrap_or_default();
        info!(pid, binary = %binary.display(), "child started");
        Ok(Self {
            child,
            pid,
            binary: binary.to_path_buf(),
            digest,
        })
    }

    /// Process id.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Binary the process was started from.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Digest of the binary at launch, when known.
    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Returns the exit status if the child has exited.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the status cannot be queried.
    pub fn try_exited(&mut self) -> Result<Option<ExitStatus>> {
        Ok(self.child.try_wait()?)
    }

    /// Kills the child and every descendant, then waits for the child to exit.
    ///
    /// Descendants are collected before anything is killed, since orphans are
    /// re-parented and can no longer be traced back to the child. On timeout
    /// the handle stays valid so the caller can keep tracking the child.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::KillTimeout`] if the child is still running
    /// after `timeout`.
    pub async fn kill_tree(&mut self, timeout: Duration) -> Result<ExitStatus> {
        let descendants = descendants_of(self.pid);
        debug!(pid = self.pid, descendants = descendants.len(), "killing process tree");

        if !descendants.is_empty() {
            let sys = System::new_all();
            for pid in descendants.iter().rev() {
                if let Some(process) = sys.process(Pid::from_u32(*pid)) {
                    process.kill();
                }
            }
        }

        if let Err(e) = self.child.start_kill() {
            // Already exited: wait() below still reaps it.
            debug!(pid = self.pid, error = %e, "kill signal not delivered");
        }

        let status = self.wait_exit(timeout).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        while !descendants.is_empty() && any_alive(&descendants) {
            if tokio::time::Instant::now() >= deadline {
                warn!(pid = self.pid, "descendants still alive after kill");
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!(pid = self.pid, %status, "child terminated");
        Ok(status)
    }

    /// Waits up to `timeout` for the child to exit.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::KillTimeout`] if it is still running.
    pub async fn wait_exit(&mut self, timeout: Duration) -> Result<ExitStatus> {
        let status = tokio::time::timeout(timeout, self.child.wait())
            .await
            .map_err(|_| WatchdogError::KillTimeout { pid: self.pid })??;
        Ok(status)
    }
}

/// All live descendants of `root`, nearest first.
#[must_use]
pub fn descendants_of(root: u32) -> Vec<u32> {
    let sys = System::new_all();
    let mut found = Vec::new();
    let mut frontier = vec![root];

    while let Some(parent) = frontier.pop() {
        for (pid, process) in sys.processes() {
            if process.parent().map(Pid::as_u32) == Some(parent)
                && process.status() != ProcessStatus::Zombie
                && !found.contains(&pid.as_u32())
            {
                found.push(pid.as_u32());
                frontier.push(pid.as_u32());
            }
        }
    }
    found
}

fn any_alive(pids: &[u32]) -> bool {
    let sys = System::new_all();
    pids.iter().any(|pid| {
        sys.process(Pid::from_u32(*pid))
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn script(dir: &tempfile::TempDir, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    #[tokio::test]
    async fn test_spawn_and_observe_exit() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = script(&dir, "quick", "exit 3");

        let mut process = SupervisedProcess::spawn(&path, &[], None).expect("spawn");
        assert!(process.pid() > 0);

        let mut status = None;
        for _ in 0..100 {
            status = process.try_exited().expect("try_wait");
            if status.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(status.and_then(|s| s.code()), Some(3));
    }

    #[tokio::test]
    async fn test_kill_tree_takes_grandchildren() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = script(&dir, "parent", "sleep 30 &\nsleep 30\nwait");

        let mut process = SupervisedProcess::spawn(&path, &[], Some("abc".into())).expect("spawn");
        assert_eq!(process.digest(), Some("abc"));
        let pid = process.pid();

        let mut children = Vec::new();
        for _ in 0..100 {
            children = descendants_of(pid);
            if children.len() >= 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(children.len() >= 2, "children = {children:?}");

        process.kill_tree(Duration::from_secs(5)).await.expect("kill tree");
        assert!(!any_alive(&children));
        assert!(!any_alive(&[pid]));
    }

    #[tokio::test]
    async fn test_wait_timeout_keeps_handle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = script(&dir, "stubborn", "exec sleep 30");

        let mut process = SupervisedProcess::spawn(&path, &[], None).expect("spawn");
        let pid = process.pid();

        let err = process
            .wait_exit(Duration::from_millis(50))
            .await
            .expect_err("still running");
        assert!(matches!(err, WatchdogError::KillTimeout { pid: p } if p == pid));
        assert!(process.try_exited().expect("try_wait").is_none());

        process.kill_tree(Duration::from_secs(5)).await.expect("kill tree");
        assert!(!any_alive(&[pid]));
    }

    #[tokio::test]
    async fn test_spawn_missing_binary() {
        let err = SupervisedProcess::spawn(Path::new("/no/such/binary"), &[], None)
            .expect_err("spawn should fail");
        assert!(matches!(err, WatchdogError::Spawn { .. }));
    }
}
