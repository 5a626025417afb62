//! Lifecycle manager against shell-script stand-ins for `qemu-system-*` and
//! `qemu-img`.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use vmdeck_core::{Architecture, MachineConfig, OsFamily};
use vmdeck_host::application::{LifecycleError, LifecycleManager, LifecycleSettings, MachineState};
use vmdeck_host::infrastructure::emulator::PrefixInstallation;
use vmdeck_host::infrastructure::storage::NoContentResolver;

// ── Fixture ───────────────────────────────────────────────────────────────────

struct Host {
    dir: TempDir,
    manager: Arc<LifecycleManager>,
}

impl Host {
    /// Installs `emulator_body` as `qemu-system-x86_64` and a working
    /// `qemu-img` under a temporary prefix.
    fn new(emulator_body: &str) -> Self {
        Self::with_probe(emulator_body, Duration::from_millis(200))
    }

    fn with_probe(emulator_body: &str, probe: Duration) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let prefix = dir.path().join("prefix");
        let log = dir.path().join("log");
        std::fs::create_dir_all(&log).unwrap();

        let body = emulator_body.replace("$LOG", &log.display().to_string());
        script(&prefix.join("bin/qemu-system-x86_64"), &body);
        script(&prefix.join("bin/qemu-img"), ": > \"$4\"");

        let mut settings = LifecycleSettings::new(dir.path().join("storage"));
        settings.startup_probe = probe;
        std::fs::create_dir_all(&settings.storage_root).unwrap();

        let manager = LifecycleManager::new(
            settings,
            Arc::new(PrefixInstallation::new(&prefix, None)),
            Arc::new(NoContentResolver),
        );
        Self {
            dir,
            manager: Arc::new(manager),
        }
    }

    fn log(&self, name: &str) -> PathBuf {
        self.dir.path().join("log").join(name)
    }

    fn storage(&self) -> PathBuf {
        self.dir.path().join("storage")
    }
}

fn script(path: &Path, body: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, format!("#!/bin/sh\n{body}\n")).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn machine(port: u16) -> MachineConfig {
    let mut config = MachineConfig::new("test", Architecture::X86_64, OsFamily::Linux);
    config.disk_size_mib = 1;
    config.display_port = port;
    config
}

async fn wait_for_file(path: &Path) -> bool {
    for _ in 0..40 {
        if path.exists() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

const LONG_RUNNING: &str = "echo started >> $LOG/launches\nexec sleep 30";

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_start_returns_display_port_and_machine_is_running() {
    // Arrange
    let host = Host::new(LONG_RUNNING);
    let config = machine(5902);

    // Act
    let port = host.manager.start(&config).await.expect("start");

    // Assert
    assert_eq!(port, 5902);
    assert_eq!(host.manager.state(&config.id), MachineState::Running);
    assert_eq!(host.manager.active(), vec![(config.id.clone(), 5902)]);
    host.manager.stop_all().await;
}

#[tokio::test]
async fn test_second_start_of_running_machine_launches_nothing() {
    let host = Host::new(LONG_RUNNING);
    let config = machine(5900);

    let first = host.manager.start(&config).await.expect("first");
    let second = host.manager.start(&config).await.expect("second");

    assert_eq!(first, second);
    let launches = std::fs::read_to_string(host.log("launches")).unwrap();
    assert_eq!(launches.lines().count(), 1);
    host.manager.stop_all().await;
}

#[tokio::test]
async fn test_emulator_gets_built_command_environment_and_working_dir() {
    // Arrange
    let host = Host::new(
        "printf '%s\\n' \"$@\" > $LOG/args\necho \"$QEMU_AUDIO_DRV\" > $LOG/audio\npwd > $LOG/cwd\nexec sleep 30",
    );
    let config = machine(5901);

    // Act
    host.manager.start(&config).await.expect("start");

    // Assert
    let args = std::fs::read_to_string(host.log("args")).unwrap();
    let args: Vec<&str> = args.lines().collect();
    let vnc = args.iter().position(|a| *a == "-vnc").expect("-vnc flag");
    assert_eq!(args[vnc + 1], ":1");
    let disk = host.storage().join("images").join(format!("{}.qcow2", config.id));
    assert!(args.iter().any(|a| a.contains(&disk.display().to_string())));
    assert_eq!(std::fs::read_to_string(host.log("audio")).unwrap().trim(), "none");
    let cwd = std::fs::read_to_string(host.log("cwd")).unwrap();
    assert_eq!(
        std::fs::canonicalize(cwd.trim()).unwrap(),
        std::fs::canonicalize(host.storage()).unwrap()
    );
    host.manager.stop_all().await;
}

#[tokio::test]
async fn test_immediate_exit_is_launch_failure_with_captured_output() {
    // Arrange
    let host = Host::new("echo 'qemu: could not load PC BIOS' >&2\nexit 1");
    let config = machine(5900);

    // Act
    let result = host.manager.start(&config).await;

    // Assert
    match result {
        Err(LifecycleError::LaunchFailed { machine, output }) => {
            assert_eq!(machine, config.id);
            assert!(output.contains("could not load PC BIOS"), "output: {output}");
        }
        other => panic!("expected LaunchFailed, got {other:?}"),
    }
    assert_eq!(host.manager.state(&config.id), MachineState::Stopped);
    assert!(host.manager.active().is_empty());
    // The disk survives for the next attempt.
    assert!(host
        .storage()
        .join("images")
        .join(format!("{}.qcow2", config.id))
        .exists());
}

#[tokio::test]
async fn test_process_that_dies_later_reads_back_as_stopped() {
    let host = Host::with_probe("sleep 0.3", Duration::from_millis(100));
    let config = machine(5900);
    host.manager.start(&config).await.expect("start");

    tokio::time::sleep(Duration::from_millis(800)).await;

    assert_eq!(host.manager.state(&config.id), MachineState::Stopped);
    assert!(host.manager.active().is_empty());
}

#[tokio::test]
async fn test_stop_forgets_machine_at_once_and_sends_sigterm() {
    // Arrange: the stand-in notes SIGTERM before exiting
    let host = Host::new("trap 'echo term > $LOG/term; exit 0' TERM\nwhile :; do sleep 0.05; done");
    let config = machine(5900);
    host.manager.start(&config).await.expect("start");

    // Act
    let stopped = host.manager.stop(&config.id).await;

    // Assert
    assert!(stopped);
    assert_eq!(host.manager.state(&config.id), MachineState::Stopped);
    assert!(wait_for_file(&host.log("term")).await, "emulator never saw SIGTERM");
    assert!(!host.manager.stop(&config.id).await);
}

#[tokio::test]
async fn test_display_port_held_by_running_machine_is_refused() {
    let host = Host::new(LONG_RUNNING);
    let first = machine(5905);
    let second = machine(5905);
    host.manager.start(&first).await.expect("first");

    let result = host.manager.start(&second).await;

    assert!(matches!(
        result,
        Err(LifecycleError::PortInUse { port: 5905, ref holder }) if *holder == first.id
    ));
    assert_eq!(host.manager.state(&second.id), MachineState::Stopped);
    host.manager.stop_all().await;
}

#[tokio::test]
async fn test_stop_during_startup_cancels_the_start() {
    // Arrange
    let host = Host::with_probe(LONG_RUNNING, Duration::from_secs(3));
    let config = machine(5900);
    let manager = Arc::clone(&host.manager);
    let starting = config.clone();
    let start = tokio::spawn(async move { manager.start(&starting).await });
    assert!(wait_for_file(&host.log("launches")).await, "emulator never launched");
    assert_eq!(host.manager.state(&config.id), MachineState::Starting);

    // Act
    let stopped = host.manager.stop(&config.id).await;
    let result = start.await.expect("join");

    // Assert
    assert!(stopped);
    assert!(matches!(result, Err(LifecycleError::StartCancelled(id)) if id == config.id));
    assert_eq!(host.manager.state(&config.id), MachineState::Stopped);
}

#[tokio::test]
async fn test_existing_disk_image_is_used_without_provisioning() {
    let host = Host::new("printf '%s\\n' \"$@\" > $LOG/args\nexec sleep 30");
    let image = host.dir.path().join("mine.img");
    std::fs::write(&image, b"").unwrap();
    let mut config = machine(5900);
    config.disk_image = Some(image.display().to_string());

    host.manager.start(&config).await.expect("start");

    let args = std::fs::read_to_string(host.log("args")).unwrap();
    assert!(args.contains(&image.display().to_string()));
    assert!(!host.storage().join("images").exists());
    host.manager.stop_all().await;
}

#[tokio::test]
async fn test_missing_boot_media_uri_is_dropped_and_start_succeeds() {
    let host = Host::new("printf '%s\\n' \"$@\" > $LOG/args\nexec sleep 30");
    let mut config = machine(5900);
    config.boot_media = Some("content://provider/document/7".into());

    host.manager.start(&config).await.expect("start");

    let args = std::fs::read_to_string(host.log("args")).unwrap();
    assert!(!args.lines().any(|a| a == "-cdrom"));
    host.manager.stop_all().await;
}

#[tokio::test]
async fn test_saved_machine_can_be_started_and_deleted() {
    // Arrange
    let host = Host::new(LONG_RUNNING);
    let config = machine(5904);
    host.manager.save(&config).expect("save");

    // Act
    let port = host.manager.start_saved(&config.id).await.expect("start");
    host.manager.delete(&config.id).await.expect("delete");

    // Assert
    assert_eq!(port, 5904);
    assert_eq!(host.manager.state(&config.id), MachineState::Stopped);
    assert!(host.manager.machines().expect("list").is_empty());
}
