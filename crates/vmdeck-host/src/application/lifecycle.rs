//! Use case: start, watch and stop emulator processes.
//!
//! # State per machine id
//!
//! ```text
//!             start()                probe ok
//!  Stopped ───────────► Starting ───────────────► Running
//!     ▲                   │  │                       │
//!     │   launch failure  │  │ stop()                │ stop() / process died
//!     └───────────────────┘  └───────────────────────┴──► Stopped
//! ```
//!
//! The manager keeps one in-memory slot per machine that is Starting or
//! Running.  Stopping is not a tracked state: `stop` removes the slot at
//! once and a detached task reaps the process in the background.
//!
//! The slot map sits behind a `std::sync::Mutex` that is never held across
//! an `.await`; disk provisioning, media resolution and the startup probe
//! all run unlocked.  A start that is in flight is identified by a
//! per-attempt ticket so that a `stop` followed by a fresh `start` cannot be
//! mistaken for the original attempt.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};
use vmdeck_core::{build_command, ConfigError, MachineConfig};

use crate::infrastructure::emulator::EmulatorInstallation;
use crate::infrastructure::process::{EmulatorProcess, Launcher};
use crate::infrastructure::storage::{
    self, ContentResolver, DiskError, DiskProvisioner, MachineStore, MediaCache, StoreError,
};

/// Default length of the startup probe window.
pub const DEFAULT_STARTUP_PROBE: Duration = Duration::from_secs(2);

const PROBE_INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const PROBE_MAX_BACKOFF: Duration = Duration::from_millis(400);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors returned by [`LifecycleManager`] operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("invalid machine configuration: {0}")]
    Invalid(#[from] ConfigError),

    #[error("emulator binary not found or not executable: {}", path.display())]
    EmulatorMissing { path: PathBuf },

    #[error("machine {0} is already starting")]
    AlreadyStarting(String),

    #[error("display port {port} is already used by machine {holder}")]
    PortInUse { port: u16, holder: String },

    #[error("disk provisioning failed: {0}")]
    Disk(#[from] DiskError),

    #[error("failed to launch {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The emulator exited inside the startup probe window.
    #[error("emulator for machine {machine} exited during startup: {output}")]
    LaunchFailed { machine: String, output: String },

    #[error("start of machine {0} was cancelled by stop")]
    StartCancelled(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no machine with id {0}")]
    NotFound(String),
}

// ── Public types ──────────────────────────────────────────────────────────────

/// Observable state of one machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    Stopped,
    Starting,
    Running,
}

/// Tunables for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    /// Root of `configs/` and `images/`; also the emulator's working
    /// directory.
    pub storage_root: PathBuf,
    /// How long a fresh process must stay alive to count as started.
    pub startup_probe: Duration,
    /// When set, a stopped process that is still alive after this long is
    /// killed.  When unset, stop never escalates.
    pub stop_grace: Option<Duration>,
}

impl LifecycleSettings {
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            startup_probe: DEFAULT_STARTUP_PROBE,
            stop_grace: None,
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

enum Slot {
    Starting { port: u16, ticket: u64 },
    Running { port: u16, process: EmulatorProcess },
}

impl Slot {
    fn port(&self) -> u16 {
        match self {
            Slot::Starting { port, .. } | Slot::Running { port, .. } => *port,
        }
    }
}

/// Owns every emulator process started through it.
///
/// Processes are not killed when the manager is dropped; callers that want
/// them gone call [`LifecycleManager::stop_all`] first.
pub struct LifecycleManager {
    settings: LifecycleSettings,
    installation: Arc<dyn EmulatorInstallation>,
    launcher: Launcher,
    disks: DiskProvisioner,
    media: MediaCache,
    store: MachineStore,
    slots: Mutex<HashMap<String, Slot>>,
    next_ticket: AtomicU64,
}

impl LifecycleManager {
    pub fn new(
        settings: LifecycleSettings,
        installation: Arc<dyn EmulatorInstallation>,
        resolver: Arc<dyn ContentResolver>,
    ) -> Self {
        let mut environment = installation.environment();
        environment.push(("QEMU_AUDIO_DRV".to_string(), "none".to_string()));
        let launcher = Launcher {
            loader: installation.loader(),
            environment,
            working_dir: Some(settings.storage_root.clone()),
        };

        let images = storage::images_dir(&settings.storage_root);
        let disks = DiskProvisioner::new(
            &images,
            installation.layout().image_tool_path(),
            launcher.clone(),
        );
        let media = MediaCache::new(&images, resolver);
        let store = MachineStore::new(&settings.storage_root);

        Self {
            settings,
            installation,
            launcher,
            disks,
            media,
            store,
            slots: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
        }
    }

    // ── Persisted machines ────────────────────────────────────────────────────

    /// All stored machines.
    pub fn machines(&self) -> Result<Vec<MachineConfig>, LifecycleError> {
        Ok(self.store.load()?)
    }

    pub fn machine(&self, id: &str) -> Result<MachineConfig, LifecycleError> {
        self.store
            .get(id)?
            .ok_or_else(|| LifecycleError::NotFound(id.to_string()))
    }

    /// Validates and persists `config`.
    pub fn save(&self, config: &MachineConfig) -> Result<(), LifecycleError> {
        self.store.save(config)?;
        Ok(())
    }

    /// Stops the machine if it is running, then removes its record.
    pub async fn delete(&self, id: &str) -> Result<(), LifecycleError> {
        self.stop(id).await;
        if self.store.delete(id)? {
            info!(machine = %id, "machine deleted");
            Ok(())
        } else {
            Err(LifecycleError::NotFound(id.to_string()))
        }
    }

    // ── Process lifecycle ─────────────────────────────────────────────────────

    /// Current state of `id`.  A Running record whose process has died is
    /// evicted and reported as Stopped.
    pub fn state(&self, id: &str) -> MachineState {
        let mut slots = self.lock();
        let alive = match slots.get_mut(id) {
            None => return MachineState::Stopped,
            Some(Slot::Starting { .. }) => return MachineState::Starting,
            Some(Slot::Running { process, .. }) => process.is_alive(),
        };
        if alive {
            MachineState::Running
        } else {
            slots.remove(id);
            info!(machine = %id, "emulator process has exited; machine stopped");
            MachineState::Stopped
        }
    }

    /// Ids and display ports of machines that are Starting or Running,
    /// sorted by port.
    pub fn active(&self) -> Vec<(String, u16)> {
        let mut slots = self.lock();
        evict_dead(&mut slots);
        let mut active: Vec<_> = slots
            .iter()
            .map(|(id, slot)| (id.clone(), slot.port()))
            .collect();
        active.sort_by_key(|(_, port)| *port);
        active
    }

    /// Starts the stored machine `id`.
    pub async fn start_saved(&self, id: &str) -> Result<u16, LifecycleError> {
        let config = self.machine(id)?;
        self.start(&config).await
    }

    /// Launches the emulator for `config` and returns its display port.
    ///
    /// Returns the port immediately if the machine is already Running.
    ///
    /// # Errors
    ///
    /// On any error no process record remains.  A disk image created on the
    /// way is kept and reused by the next attempt.
    pub async fn start(&self, config: &MachineConfig) -> Result<u16, LifecycleError> {
        config.validate()?;
        let id = config.id.as_str();
        let port = config.display_port;

        let ticket = {
            let mut slots = self.lock();
            evict_dead(&mut slots);
            match slots.get(id) {
                Some(Slot::Running { port, .. }) => {
                    debug!(machine = %id, port, "machine already running");
                    return Ok(*port);
                }
                Some(Slot::Starting { .. }) => {
                    return Err(LifecycleError::AlreadyStarting(id.to_string()))
                }
                None => {}
            }
            if let Some((holder, _)) = slots.iter().find(|(_, slot)| slot.port() == port) {
                return Err(LifecycleError::PortInUse {
                    port,
                    holder: holder.clone(),
                });
            }
            let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
            slots.insert(id.to_string(), Slot::Starting { port, ticket });
            ticket
        };
        info!(machine = %id, port, "starting machine");

        let mut process = match self.launch(config).await {
            Ok(process) => process,
            Err(e) => {
                self.clear_starting(id, ticket);
                warn!(machine = %id, error = %e, "machine failed to launch");
                return Err(e);
            }
        };

        if let Err(e) = self.probe(id, ticket, &mut process).await {
            self.clear_starting(id, ticket);
            if matches!(e, LifecycleError::StartCancelled(_)) {
                self.discard(id, process);
            }
            warn!(machine = %id, error = %e, "machine failed to start");
            return Err(e);
        }

        let mut slots = self.lock();
        if is_current(&slots, id, ticket) {
            let pid = process.pid();
            slots.insert(id.to_string(), Slot::Running { port, process });
            info!(machine = %id, port, pid = ?pid, "machine running");
            Ok(port)
        } else {
            drop(slots);
            self.discard(id, process);
            Err(LifecycleError::StartCancelled(id.to_string()))
        }
    }

    /// Asks the machine's emulator to exit and forgets it at once.
    ///
    /// Returns `false` if nothing was tracked for `id`.  A machine that is
    /// still Starting is cancelled; its `start` call returns
    /// [`LifecycleError::StartCancelled`].
    pub async fn stop(&self, id: &str) -> bool {
        let slot = self.lock().remove(id);
        match slot {
            None => false,
            Some(Slot::Starting { .. }) => {
                info!(machine = %id, "cancelling start");
                true
            }
            Some(Slot::Running { process, .. }) => {
                info!(machine = %id, "stopping machine");
                self.discard(id, process);
                true
            }
        }
    }

    /// Stops every tracked machine.
    pub async fn stop_all(&self) {
        let ids: Vec<String> = self.lock().keys().cloned().collect();
        for id in ids {
            self.stop(&id).await;
        }
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn clear_starting(&self, id: &str, ticket: u64) {
        let mut slots = self.lock();
        if is_current(&slots, id, ticket) {
            slots.remove(id);
        }
    }

    async fn launch(&self, config: &MachineConfig) -> Result<EmulatorProcess, LifecycleError> {
        let layout = self.installation.layout();
        if !self.installation.is_present(config.arch) {
            return Err(LifecycleError::EmulatorMissing {
                path: layout.emulator_path(config.arch),
            });
        }

        let disk = self.resolve_disk(config).await?;
        let mut effective = config.clone();
        effective.boot_media = self.resolve_media(config).await;

        let command_line = build_command(&effective, &disk, &layout);
        debug!(machine = %config.id, command = %command_line.display(), "emulator command");

        let command = self.launcher.command(&command_line.program, &command_line.args);
        EmulatorProcess::spawn(command, &config.id).map_err(|source| LifecycleError::Spawn {
            program: command_line.program.clone(),
            source,
        })
    }

    async fn resolve_disk(&self, config: &MachineConfig) -> Result<PathBuf, LifecycleError> {
        if let Some(image) = config.disk_image.as_deref() {
            let path = Path::new(image.strip_prefix("file://").unwrap_or(image));
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
            warn!(machine = %config.id, path = %path.display(), "disk image not found; provisioning one");
        }
        Ok(self
            .disks
            .ensure_disk(&config.id, config.disk_size_mib)
            .await?)
    }

    async fn resolve_media(&self, config: &MachineConfig) -> Option<String> {
        let reference = config.boot_media.as_deref()?;
        match self.media.resolve(reference).await {
            Ok(path) => Some(path.display().to_string()),
            Err(e) => {
                warn!(machine = %config.id, reference, error = %e, "boot media unavailable; booting without it");
                None
            }
        }
    }

    /// Watches a fresh process with exponential backoff until the probe
    /// window has elapsed.
    async fn probe(
        &self,
        id: &str,
        ticket: u64,
        process: &mut EmulatorProcess,
    ) -> Result<(), LifecycleError> {
        let deadline = Instant::now() + self.settings.startup_probe;
        let mut backoff = PROBE_INITIAL_BACKOFF;
        loop {
            if !process.is_alive() {
                let output = process.collect_output().await;
                return Err(LifecycleError::LaunchFailed {
                    machine: id.to_string(),
                    output,
                });
            }
            if !is_current(&self.lock(), id, ticket) {
                return Err(LifecycleError::StartCancelled(id.to_string()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            time::sleep(backoff.min(deadline - now)).await;
            backoff = (backoff * 2).min(PROBE_MAX_BACKOFF);
        }
    }

    /// Terminates `process` and reaps it on a detached task.
    fn discard(&self, id: &str, mut process: EmulatorProcess) {
        if let Err(e) = process.terminate() {
            warn!(machine = %id, error = %e, "could not signal emulator process");
        }
        let grace = self.settings.stop_grace;
        let machine = id.to_string();
        tokio::spawn(async move {
            let status = match grace {
                None => process.wait().await,
                Some(grace) => match time::timeout(grace, process.wait()).await {
                    Ok(status) => status,
                    Err(_) => {
                        warn!(machine = %machine, grace_ms = grace.as_millis() as u64, "emulator ignored stop; killing");
                        process.kill().await
                    }
                },
            };
            match status {
                Ok(status) => info!(machine = %machine, %status, "emulator process exited"),
                Err(e) => warn!(machine = %machine, error = %e, "could not reap emulator process"),
            }
        });
    }
}

fn is_current(slots: &HashMap<String, Slot>, id: &str, ticket: u64) -> bool {
    matches!(slots.get(id), Some(Slot::Starting { ticket: t, .. }) if *t == ticket)
}

fn evict_dead(slots: &mut HashMap<String, Slot>) {
    slots.retain(|id, slot| match slot {
        Slot::Starting { .. } => true,
        Slot::Running { process, .. } => {
            let alive = process.is_alive();
            if !alive {
                info!(machine = %id, "emulator process has exited; machine stopped");
            }
            alive
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::emulator::MockEmulatorInstallation;
    use crate::infrastructure::storage::NoContentResolver;
    use vmdeck_core::{Architecture, EmulatorLayout, OsFamily};

    fn installation(present: bool) -> MockEmulatorInstallation {
        let mut mock = MockEmulatorInstallation::new();
        mock.expect_is_present().return_const(present);
        mock.expect_layout()
            .returning(|| EmulatorLayout::from_prefix(Path::new("/opt/emu")));
        mock.expect_loader().return_const(None::<PathBuf>);
        mock.expect_environment().returning(Vec::new);
        mock
    }

    fn manager(root: &Path, present: bool) -> LifecycleManager {
        LifecycleManager::new(
            LifecycleSettings::new(root),
            Arc::new(installation(present)),
            Arc::new(NoContentResolver),
        )
    }

    #[tokio::test]
    async fn test_start_without_emulator_fails_fast_and_leaves_no_record() {
        // Arrange
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), false);
        let config = MachineConfig::new("m", Architecture::Aarch64, OsFamily::Linux);

        // Act
        let result = manager.start(&config).await;

        // Assert
        match result {
            Err(LifecycleError::EmulatorMissing { path }) => {
                assert_eq!(path, PathBuf::from("/opt/emu/bin/qemu-system-aarch64"));
            }
            other => panic!("expected EmulatorMissing, got {other:?}"),
        }
        assert_eq!(manager.state(&config.id), MachineState::Stopped);
        assert!(manager.active().is_empty());
        assert!(!dir.path().join("images").exists(), "no disk before the emulator check");
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), true);
        let mut config = MachineConfig::new("m", Architecture::X86_64, OsFamily::Linux);
        config.memory_mib = 0;

        let result = manager.start(&config).await;

        assert!(matches!(result, Err(LifecycleError::Invalid(_))));
    }

    #[tokio::test]
    async fn test_stop_of_unknown_machine_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), true);

        assert!(!manager.stop("nope").await);
        assert_eq!(manager.state("nope"), MachineState::Stopped);
    }

    #[tokio::test]
    async fn test_stop_of_starting_machine_removes_marker() {
        // Arrange: plant a Starting marker as an in-flight start would
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), true);
        manager
            .lock()
            .insert("m".into(), Slot::Starting { port: 5901, ticket: 7 });
        assert_eq!(manager.state("m"), MachineState::Starting);

        // Act
        let stopped = manager.stop("m").await;

        // Assert
        assert!(stopped);
        assert_eq!(manager.state("m"), MachineState::Stopped);
        assert!(!is_current(&manager.lock(), "m", 7));
    }

    #[tokio::test]
    async fn test_port_held_by_starting_machine_is_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), true);
        manager
            .lock()
            .insert("other".into(), Slot::Starting { port: 5900, ticket: 0 });
        let config = MachineConfig::new("m", Architecture::X86_64, OsFamily::Linux);

        let result = manager.start(&config).await;

        assert!(matches!(
            result,
            Err(LifecycleError::PortInUse { port: 5900, ref holder }) if holder == "other"
        ));
    }

    #[tokio::test]
    async fn test_delete_of_unknown_machine_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path(), true);

        let result = manager.delete("ghost").await;

        assert!(matches!(result, Err(LifecycleError::NotFound(id)) if id == "ghost"));
    }

    #[test]
    fn test_settings_default_to_two_second_probe_and_no_escalation() {
        let settings = LifecycleSettings::new("/data");

        assert_eq!(settings.startup_probe, Duration::from_secs(2));
        assert_eq!(settings.stop_grace, None);
    }
}
