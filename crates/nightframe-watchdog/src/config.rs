//! Supervisor configuration.
//!
//! Stored as JSON. Durations are plain millisecond integers so the file is
//! easy to edit by hand:
//!
//! ```json
//! {
//!   "binary": "/opt/nightframe/node",
//!   "args": ["--data", "/var/lib/nightframe"],
//!   "poll_interval_ms": 5000,
//!   "drain_grace_ms": 2000,
//!   "kill_timeout_ms": 10000
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, WatchdogError};

/// Default name of the update marker placed next to the binary.
pub const DEFAULT_SIGNAL_NAME: &str = "update.signal";

/// Configuration for an [`crate::UpdateSupervisor`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Binary to supervise.
    pub binary: PathBuf,
    /// Arguments passed to the binary.
    pub args: Vec<String>,
    /// Replacement binary; `<binary>.update` when unset.
    pub candidate: Option<PathBuf>,
    /// Backup location; `<binary>.bak` when unset.
    pub backup: Option<PathBuf>,
    /// File name of the update marker in the binary's directory.
    pub signal_name: String,
    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Grace period before the child is killed for an update.
    pub drain_grace_ms: u64,
    /// How long to wait for a killed child to exit.
    pub kill_timeout_ms: u64,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::new(),
            args: Vec::new(),
            candidate: None,
            backup: None,
            signal_name: DEFAULT_SIGNAL_NAME.to_string(),
            poll_interval_ms: 5_000,
            drain_grace_ms: 2_000,
            kill_timeout_ms: 10_000,
        }
    }
}

impl WatchdogConfig {
    /// Creates a configuration for `binary` with default timings.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            ..Self::default()
        }
    }

    /// Sets the arguments passed to the binary.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Sets the drain grace period.
    #[must_use]
    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace_ms = duration_ms(grace);
        self
    }

    /// Sets the kill timeout.
    #[must_use]
    pub fn with_kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout_ms = duration_ms(timeout);
        self
    }

    /// Loads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            WatchdogError::Config(format!(
                "failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Writes the configuration as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.binary.as_os_str().is_empty() {
            return Err(WatchdogError::Config("binary path cannot be empty".into()));
        }
        if self.binary.file_name().is_none() {
            return Err(WatchdogError::Config(format!(
                "binary path '{}' has no file name",
                self.binary.display()
            )));
        }
        if self.signal_name.is_empty() || self.signal_name.contains(['/', '\\']) {
            return Err(WatchdogError::Config(
                "signal_name must be a plain file name".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(WatchdogError::Config(
                "poll_interval_ms must be greater than zero".into(),
            ));
        }
        if self.candidate_path() == self.binary || self.backup_path() == self.binary {
            return Err(WatchdogError::Config(
                "candidate and backup paths must differ from the binary".into(),
            ));
        }
        let staged = self.staged_path();
        if self.candidate_path() == staged || self.backup_path() == staged {
            return Err(WatchdogError::Config(format!(
                "'{}' is reserved for staging updates",
                staged.display()
            )));
        }
        Ok(())
    }

    /// Directory holding the binary.
    #[must_use]
    pub fn binary_dir(&self) -> PathBuf {
        match self.binary.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Path of the update marker.
    #[must_use]
    pub fn signal_path(&self) -> PathBuf {
        self.binary_dir().join(&self.signal_name)
    }

    /// Path of the replacement binary.
    #[must_use]
    pub fn candidate_path(&self) -> PathBuf {
        self.candidate
            .clone()
            .unwrap_or_else(|| with_suffix(&self.binary, ".update"))
    }

    /// Path of the backup copy.
    #[must_use]
    pub fn backup_path(&self) -> PathBuf {
        self.backup
            .clone()
            .unwrap_or_else(|| with_suffix(&self.binary, ".bak"))
    }

    /// Private copy of the candidate that is verified and then installed.
    ///
    /// Lives next to the binary so the final rename stays on one filesystem.
    #[must_use]
    pub fn staged_path(&self) -> PathBuf {
        with_suffix(&self.binary, ".staged")
    }

    /// Path of the single-instance lock file.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        with_suffix(&self.binary, ".watchdog.lock")
    }

    /// Poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Drain grace period.
    #[must_use]
    pub const fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    /// Kill timeout.
    #[must_use]
    pub const fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_derived_paths() {
        let config = WatchdogConfig::new("/opt/nf/node");
        assert_eq!(config.signal_path(), PathBuf::from("/opt/nf/update.signal"));
        assert_eq!(config.candidate_path(), PathBuf::from("/opt/nf/node.update"));
        assert_eq!(config.backup_path(), PathBuf::from("/opt/nf/node.bak"));
        assert_eq!(config.staged_path(), PathBuf::from("/opt/nf/node.staged"));
        assert_eq!(config.lock_path(), PathBuf::from("/opt/nf/node.watchdog.lock"));
    }

    #[test]
    fn test_bare_file_name_uses_current_dir() {
        let config = WatchdogConfig::new("node");
        assert_eq!(config.signal_path(), PathBuf::from("./update.signal"));
    }

    #[test]
    fn test_builders_store_milliseconds() {
        let config = WatchdogConfig::new("/bin/node")
            .with_poll_interval(Duration::from_millis(250))
            .with_drain_grace(Duration::from_secs(1))
            .with_args(["--port", "9000"]);
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.drain_grace(), Duration::from_secs(1));
        assert_eq!(config.args, vec!["--port".to_string(), "9000".to_string()]);
    }

    #[test_case(WatchdogConfig::default() ; "empty binary")]
    #[test_case(WatchdogConfig { signal_name: "a/b".into(), ..WatchdogConfig::new("/x/node") } ; "nested signal")]
    #[test_case(WatchdogConfig { poll_interval_ms: 0, ..WatchdogConfig::new("/x/node") } ; "zero poll")]
    #[test_case(WatchdogConfig { candidate: Some("/x/node".into()), ..WatchdogConfig::new("/x/node") } ; "candidate is binary")]
    #[test_case(WatchdogConfig { backup: Some("/x/node.staged".into()), ..WatchdogConfig::new("/x/node") } ; "backup is staging path")]
    fn test_invalid_configs(config: WatchdogConfig) {
        assert!(matches!(config.validate(), Err(WatchdogError::Config(_))));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("watchdog.json");
        let config = WatchdogConfig::new("/opt/nf/node").with_args(["--verbose"]);

        config.save(&path).expect("save");
        let loaded = WatchdogConfig::load(&path).expect("load");
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("watchdog.json");
        std::fs::write(&path, r#"{ "binary": "/opt/nf/node" }"#).expect("write");

        let loaded = WatchdogConfig::load(&path).expect("load");
        assert_eq!(loaded.poll_interval_ms, 5_000);
        assert_eq!(loaded.signal_name, DEFAULT_SIGNAL_NAME);
    }

    #[test]
    fn test_load_missing_file() {
        let err = WatchdogConfig::load("/definitely/not/here.json").expect_err("missing");
        assert!(err.to_string().contains("failed to read config file"));
    }
}
