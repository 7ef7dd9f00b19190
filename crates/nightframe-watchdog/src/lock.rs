//! Single-instance guard.
//!
//! One supervisor per binary. The lock file holds the owner's pid; a lock
//! whose pid is no longer alive is taken over. A live pid always blocks,
//! including our own, so two supervisors in one process also conflict.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sysinfo::{Pid, System};
use tracing::{debug, warn};

use crate::error::{Result, WatchdogError};

/// Held for as long as the supervisor runs; removes the lock file on drop.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    /// Takes the lock at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::AlreadyRunning`] while another live process
    /// holds the lock, or an IO error if the file cannot be created.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let own_pid = std::process::id();

        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    writeln!(file, "{own_pid}")?;
                    debug!(lock = %path.display(), pid = own_pid, "instance lock acquired");
                    return Ok(Self { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    match read_pid(&path) {
                        Some(pid) if is_alive(pid) => {
                            return Err(WatchdogError::AlreadyRunning { pid, lock: path });
                        }
                        holder => {
                            warn!(lock = %path.display(), ?holder, "taking over stale lock");
                            std::fs::remove_file(&path)?;
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(WatchdogError::Config(format!(
            "could not acquire lock file '{}'",
            path.display()
        )))
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for InstanceLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

fn is_alive(pid: u32) -> bool {
    let sys = System::new_all();
    sys.process(Pid::from_u32(pid)).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("node.watchdog.lock");

        let lock = InstanceLock::acquire(&path).expect("lock");
        let content = std::fs::read_to_string(&path).expect("read");
        assert_eq!(content.trim(), std::process::id().to_string());
        assert_eq!(lock.path(), path);

        drop(lock);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_live_holder_blocks() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("node.watchdog.lock");

        let mut holder = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn holder");
        std::fs::write(&path, format!("{}\n", holder.id())).expect("write");

        let result = InstanceLock::acquire(&path);
        holder.kill().expect("kill");
        holder.wait().expect("wait");

        match result {
            Err(WatchdogError::AlreadyRunning { pid, .. }) => assert_eq!(pid, holder.id()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stale_and_garbage_locks_are_taken_over() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("node.watchdog.lock");

        std::fs::write(&path, "not a pid").expect("write");
        let lock = InstanceLock::acquire(&path).expect("garbage lock");
        drop(lock);

        // Pid values above the kernel's maximum are never alive.
        std::fs::write(&path, "4294967290\n").expect("write");
        assert!(InstanceLock::acquire(&path).is_ok());
    }
}
