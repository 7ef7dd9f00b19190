//! End-to-end update scenarios against real child processes.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use nightframe_watchdog::{
    SupervisorEvent, SupervisorState, SupervisorStatus, UpdateSupervisor, WatchdogConfig,
    WatchdogError, digest,
};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const V1: &str = "#!/bin/sh\n# build 1\nexec sleep 30\n";
const V2: &str = "#!/bin/sh\n# build 2\nexec sleep 30\n";
const TAMPERED: &str = "#!/bin/sh\n# not the announced build\nexec sleep 30\n";

fn write_executable(path: &Path, body: &str) {
    std::fs::write(path, body).expect("write binary");
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
}

/// Writes the marker atomically so the supervisor never sees it half written.
fn stage_signal(config: &WatchdogConfig, content: &str) {
    let tmp = config.binary_dir().join("signal.tmp");
    std::fs::write(&tmp, content).expect("write signal");
    std::fs::rename(&tmp, config.signal_path()).expect("rename signal");
}

fn config_for(dir: &TempDir) -> WatchdogConfig {
    config_at(&dir.path().join("node"))
}

fn config_at(binary: &Path) -> WatchdogConfig {
    WatchdogConfig::new(binary)
        .with_poll_interval(Duration::from_millis(20))
        .with_drain_grace(Duration::from_millis(10))
        .with_kill_timeout(Duration::from_secs(5))
}

fn received(events: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    seen
}

struct Harness {
    supervisor: Arc<UpdateSupervisor>,
    cancel: CancellationToken,
    task: JoinHandle<nightframe_watchdog::Result<()>>,
}

impl Harness {
    fn start(config: WatchdogConfig) -> Self {
        let supervisor = Arc::new(UpdateSupervisor::new(config).expect("supervisor"));
        let cancel = CancellationToken::new();
        let task = {
            let supervisor = Arc::clone(&supervisor);
            let cancel = cancel.clone();
            tokio::spawn(async move { supervisor.run(cancel).await })
        };
        Self {
            supervisor,
            cancel,
            task,
        }
    }

    async fn wait_for(&self, what: &str, pred: impl Fn(&SupervisorStatus) -> bool) -> SupervisorStatus {
        for _ in 0..500 {
            let status = self.supervisor.status();
            if pred(&status) {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("timed out waiting for {what}: {:?}", self.supervisor.status());
    }

    async fn stop(self) -> SupervisorStatus {
        self.cancel.cancel();
        self.task.await.expect("join").expect("run");
        self.supervisor.status()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn verified_update_replaces_binary_and_relaunches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&dir);
    write_executable(&config.binary, V1);
    let v1_digest = digest::file_digest_hex(&config.binary).expect("digest");

    let harness = Harness::start(config.clone());
    let mut events = harness.supervisor.subscribe();
    let before = harness.wait_for("first launch", |s| s.child_pid.is_some()).await;
    assert_eq!(before.installed_digest.as_deref(), Some(v1_digest.as_str()));

    let candidate = config.candidate_path();
    write_executable(&candidate, V2);
    let v2_digest = digest::file_digest_hex(&candidate).expect("digest");
    stage_signal(&config, &format!("{v2_digest}\n"));

    let after = harness
        .wait_for("relaunch on new build", |s| {
            s.updates_applied == 1 && s.child_pid.is_some_and(|pid| Some(pid) != before.child_pid)
        })
        .await;

    assert_eq!(after.installed_digest.as_deref(), Some(v2_digest.as_str()));
    assert_eq!(std::fs::read_to_string(&config.binary).expect("read"), V2);
    assert_eq!(std::fs::read_to_string(config.backup_path()).expect("read"), V1);
    assert!(!config.signal_path().exists());
    assert!(!candidate.exists());
    assert!(!config.staged_path().exists());

    let mut applied = None;
    while let Ok(event) = events.try_recv() {
        if let SupervisorEvent::UpdateApplied { digest } = event {
            applied = Some(digest);
        }
    }
    assert_eq!(applied, Some(v2_digest));

    let stopped = harness.stop().await;
    assert_eq!(stopped.child_pid, None);
    assert!(!config.lock_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn mismatched_digest_leaves_target_untouched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&dir);
    write_executable(&config.binary, V1);

    let harness = Harness::start(config.clone());
    let before = harness.wait_for("first launch", |s| s.child_pid.is_some()).await;

    write_executable(&config.candidate_path(), V2);
    stage_signal(&config, &"00".repeat(32));

    let after = harness.wait_for("rejection", |s| s.updates_rejected == 1).await;

    assert_eq!(after.updates_applied, 0);
    assert_eq!(after.child_pid, before.child_pid);
    assert_eq!(std::fs::read_to_string(&config.binary).expect("read"), V1);
    assert!(!config.signal_path().exists());
    assert!(!config.backup_path().exists());
    assert!(!config.staged_path().exists());
    assert!(config.candidate_path().exists());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signal_without_candidate_is_discarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&dir);
    write_executable(&config.binary, V1);

    let harness = Harness::start(config.clone());
    let before = harness.wait_for("first launch", |s| s.child_pid.is_some()).await;

    stage_signal(&config, &"ab".repeat(32));
    let after = harness.wait_for("rejection", |s| s.updates_rejected == 1).await;

    assert_eq!(after.child_pid, before.child_pid);
    assert!(!config.signal_path().exists());

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exited_child_is_relaunched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&dir);
    write_executable(&config.binary, "#!/bin/sh\nsleep 0.05\n");

    let harness = Harness::start(config);
    let status = harness.wait_for("restarts", |s| s.restarts >= 2).await;
    assert_eq!(status.updates_applied, 0);

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn binary_appearing_later_is_launched() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&dir);

    let harness = Harness::start(config.clone());
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(harness.supervisor.status().child_pid, None);

    write_executable(&config.binary, V1);
    harness.wait_for("launch", |s| s.child_pid.is_some()).await;

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_supervisor_is_refused() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&dir);
    write_executable(&config.binary, V1);

    let harness = Harness::start(config.clone());
    harness.wait_for("first launch", |s| s.child_pid.is_some()).await;

    let second = UpdateSupervisor::new(config).expect("supervisor");
    let result = second.run(CancellationToken::new()).await;
    match result {
        Err(WatchdogError::AlreadyRunning { pid, lock }) => {
            assert_eq!(pid, std::process::id());
            assert_eq!(lock, dir.path().join("node.watchdog.lock"));
        }
        other => panic!("unexpected {other:?}"),
    }

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn candidate_rewritten_during_drain_is_not_installed() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&dir).with_drain_grace(Duration::from_millis(500));
    write_executable(&config.binary, V1);

    let harness = Harness::start(config.clone());
    harness.wait_for("first launch", |s| s.child_pid.is_some()).await;

    let candidate = config.candidate_path();
    write_executable(&candidate, V2);
    let v2_digest = digest::file_digest_hex(&candidate).expect("digest");
    stage_signal(&config, &v2_digest);

    harness
        .wait_for("drain", |s| s.state == SupervisorState::Draining)
        .await;
    write_executable(&candidate, TAMPERED);

    let after = harness
        .wait_for("install", |s| s.updates_applied == 1 && s.child_pid.is_some())
        .await;

    assert_eq!(std::fs::read_to_string(&config.binary).expect("read"), V2);
    assert_eq!(after.installed_digest.as_deref(), Some(v2_digest.as_str()));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_directory_is_polled_until_it_appears() {
    let dir = tempfile::tempdir().expect("tempdir");
    let later = dir.path().join("later");
    let config = config_at(&later.join("node"));

    let harness = Harness::start(config.clone());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(!harness.task.is_finished());
    assert_eq!(harness.supervisor.status().state, SupervisorState::NoBinary);

    std::fs::create_dir(&later).expect("mkdir");
    write_executable(&config.binary, V1);
    harness.wait_for("launch", |s| s.child_pid.is_some()).await;
    assert!(config.lock_path().exists());

    let stopped = harness.stop().await;
    assert_eq!(stopped.child_pid, None);
    assert!(!config.lock_path().exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_install_restores_backup_and_relaunches() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_for(&dir).with_drain_grace(Duration::from_millis(500));
    write_executable(&config.binary, V1);

    let harness = Harness::start(config.clone());
    let before = harness.wait_for("first launch", |s| s.child_pid.is_some()).await;
    let mut events = harness.supervisor.subscribe();

    write_executable(&config.candidate_path(), V2);
    let v2_digest = digest::file_digest_hex(&config.candidate_path()).expect("digest");
    stage_signal(&config, &v2_digest);

    harness
        .wait_for("drain", |s| s.state == SupervisorState::Draining)
        .await;
    // Nothing left to rename into place once the drain ends.
    std::fs::remove_file(config.staged_path()).expect("remove staged copy");

    let after = harness
        .wait_for("relaunch after rollback", |s| {
            s.state == SupervisorState::Running
                && s.child_pid.is_some_and(|pid| Some(pid) != before.child_pid)
        })
        .await;

    assert_eq!(after.updates_applied, 0);
    assert_eq!(std::fs::read_to_string(&config.binary).expect("read"), V1);
    assert_eq!(std::fs::read_to_string(config.backup_path()).expect("read"), V1);
    assert!(!config.signal_path().exists());

    let seen = received(&mut events);
    assert!(seen.contains(&SupervisorEvent::StateChanged {
        from: SupervisorState::Installing,
        to: SupervisorState::RollingBack,
    }));
    assert!(
        seen.iter()
            .any(|e| matches!(e, SupervisorEvent::RolledBack { .. })),
        "events: {seen:?}"
    );
    assert!(!seen.iter().any(|e| matches!(e, SupervisorEvent::UpdateApplied { .. })));

    harness.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_install_without_backup_relaunches_current_binary() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = WatchdogConfig {
        backup: Some(dir.path().join("missing").join("node.bak")),
        ..config_for(&dir).with_drain_grace(Duration::from_millis(500))
    };
    write_executable(&config.binary, V1);

    let harness = Harness::start(config.clone());
    let before = harness.wait_for("first launch", |s| s.child_pid.is_some()).await;
    let mut events = harness.supervisor.subscribe();

    write_executable(&config.candidate_path(), V2);
    let v2_digest = digest::file_digest_hex(&config.candidate_path()).expect("digest");
    stage_signal(&config, &v2_digest);

    harness
        .wait_for("drain", |s| s.state == SupervisorState::Draining)
        .await;
    std::fs::remove_file(config.staged_path()).expect("remove staged copy");

    let after = harness
        .wait_for("relaunch", |s| {
            s.state == SupervisorState::Running
                && s.child_pid.is_some_and(|pid| Some(pid) != before.child_pid)
        })
        .await;

    assert_eq!(after.updates_applied, 0);
    assert_eq!(std::fs::read_to_string(&config.binary).expect("read"), V1);
    assert!(!config.backup_path().exists());
    assert!(!config.signal_path().exists());

    let seen = received(&mut events);
    assert!(seen.contains(&SupervisorEvent::StateChanged {
        from: SupervisorState::Installing,
        to: SupervisorState::RollingBack,
    }));
    assert!(!seen.iter().any(|e| matches!(e, SupervisorEvent::RolledBack { .. })));

    harness.stop().await;
}
