//! vmdeck: run QEMU machines and look at their screens.
//!
//! # Usage
//!
//! ```text
//! vmdeck [OPTIONS] <COMMAND>
//!
//! Commands:
//!   list      List stored machines
//!   create    Create and store a new machine
//!   delete    Delete a stored machine and its record
//!   start     Start a machine and supervise it until Ctrl+C
//!   attach    Open a viewer session against a running machine
//!   run       Start a machine, attach to it, stop it on exit
//!   console   Interactive shell over one in-process lifecycle manager
//! ```
//!
//! Emulator processes belong to the invocation that started them, so `stop`
//! and `state` exist only inside `console`; `start` and `run` stop their
//! machine when they exit.
//!
//! # Environment variable overrides
//!
//! | Variable                 | Overrides                      |
//! |--------------------------|--------------------------------|
//! | `VMDECK_CONFIG`          | path of `vmdeck.toml`          |
//! | `VMDECK_STORAGE_ROOT`    | `storage_root`                 |
//! | `VMDECK_EMULATOR_PREFIX` | `emulator_prefix`              |
//! | `VMDECK_LOADER`          | `loader`                       |
//! | `VMDECK_LOG`             | `log_level` (`RUST_LOG` wins)  |

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use vmdeck_core::{Architecture, BootOrder, MachineConfig, OsFamily, VideoAdapter};
use vmdeck_host::application::{LifecycleManager, MachineState};
use vmdeck_host::config::{self, HostConfig};
use vmdeck_host::infrastructure::emulator::PrefixInstallation;
use vmdeck_host::infrastructure::storage::NoContentResolver;
use vmdeck_host::logging;
use vmdeck_viewer::{InputForwarder, RfbSession, SessionConfig, SessionState};

/// How often foreground commands check on the emulator.
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(500);
/// Connection attempts `run` makes while the display server comes up.
const ATTACH_ATTEMPTS: u32 = 5;
const ATTACH_RETRY_DELAY: Duration = Duration::from_millis(500);

// ── CLI argument definitions ──────────────────────────────────────────────────

#[derive(Debug, Parser)]
#[command(name = "vmdeck", about = "Run QEMU virtual machines and view their displays", version)]
struct Cli {
    /// Path of the host configuration file.
    #[arg(long, global = true, env = "VMDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding machine records and disk images.
    #[arg(long, global = true, env = "VMDECK_STORAGE_ROOT")]
    storage_root: Option<PathBuf>,

    /// Installation prefix of QEMU (`<prefix>/bin/qemu-system-*`).
    #[arg(long, global = true, env = "VMDECK_EMULATOR_PREFIX")]
    emulator_prefix: Option<PathBuf>,

    /// Dynamic linker to launch emulator binaries through.
    #[arg(long, global = true, env = "VMDECK_LOADER")]
    loader: Option<PathBuf>,

    /// Log filter used when `RUST_LOG` is not set.
    #[arg(long, global = true, env = "VMDECK_LOG")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List stored machines.
    List {
        /// Print the records as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Create and store a new machine.
    Create(CreateArgs),
    /// Delete a stored machine.
    Delete { id: String },
    /// Start a machine and supervise it until Ctrl+C or emulator exit.
    Start { id: String },
    /// Open a viewer session against a running machine.
    Attach(AttachArgs),
    /// Start a machine, attach to it, and stop it when the viewer exits.
    Run {
        id: String,
        /// Text to type into the guest once connected.
        #[arg(long = "type", value_name = "TEXT")]
        text: Option<String>,
    },
    /// Interactive shell: list, start, stop, state, delete, quit.
    Console,
}

#[derive(Debug, Args)]
struct CreateArgs {
    name: String,

    #[arg(long, default_value = "x86_64")]
    arch: Architecture,

    /// windows-legacy, windows, linux or other.
    #[arg(long, default_value = "other")]
    os: OsFamily,

    /// Memory in MiB.  Defaults to the OS family's recommendation.
    #[arg(long)]
    memory: Option<u32>,

    #[arg(long)]
    cpus: Option<u32>,

    /// Disk size in MiB.  Defaults to the OS family's minimum.
    #[arg(long)]
    disk_size: Option<u32>,

    /// Existing disk image to use instead of a provisioned one.
    #[arg(long)]
    disk_image: Option<String>,

    /// ISO path or URI.
    #[arg(long)]
    boot_media: Option<String>,

    #[arg(long, default_value_t = vmdeck_core::domain::machine::BASE_DISPLAY_PORT)]
    display_port: u16,

    /// cd-then-disk, disk-then-cd or cd-only.
    #[arg(long)]
    boot_order: Option<BootOrder>,

    /// auto, std, cirrus, vmware, qxl or virtio.
    #[arg(long)]
    video: Option<VideoAdapter>,

    #[arg(long)]
    audio: bool,

    #[arg(long)]
    hardware_acceleration: bool,

    #[arg(long)]
    no_acpi: bool,
}

impl CreateArgs {
    fn into_machine(self) -> MachineConfig {
        let mut machine = MachineConfig::new(self.name, self.arch, self.os);
        if let Some(memory) = self.memory {
            machine.memory_mib = memory;
        }
        if let Some(cpus) = self.cpus {
            machine.cpus = cpus;
        }
        if let Some(size) = self.disk_size {
            machine.disk_size_mib = size;
        }
        if let Some(order) = self.boot_order {
            machine.boot_order = order;
        }
        if let Some(video) = self.video {
            machine.video = video;
        }
        machine.disk_image = self.disk_image;
        machine.boot_media = self.boot_media;
        machine.display_port = self.display_port;
        machine.audio = self.audio;
        machine.hardware_acceleration = self.hardware_acceleration;
        machine.acpi = !self.no_acpi;
        machine
    }
}

#[derive(Debug, Args)]
struct AttachArgs {
    /// Stored machine whose display port to use.
    #[arg(required_unless_present = "port")]
    id: Option<String>,

    /// Display port to connect to directly.
    #[arg(long, conflicts_with = "id")]
    port: Option<u16>,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Text to type into the guest once connected.
    #[arg(long = "type", value_name = "TEXT")]
    text: Option<String>,
}

impl Cli {
    /// The file config with command-line overrides applied.
    fn host_config(&self) -> anyhow::Result<HostConfig> {
        let path = match &self.config {
            Some(path) => Some(path.clone()),
            None => config::config_file_path().ok(),
        };
        let mut host = match path {
            Some(path) => config::load_config(&path)
                .with_context(|| format!("failed to load {}", path.display()))?,
            None => HostConfig::default(),
        };
        if let Some(root) = &self.storage_root {
            host.storage_root = root.clone();
        }
        if let Some(prefix) = &self.emulator_prefix {
            host.emulator_prefix = prefix.clone();
        }
        if let Some(loader) = &self.loader {
            host.loader = Some(loader.clone());
        }
        if let Some(level) = &self.log_level {
            host.log_level = level.clone();
        }
        Ok(host)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let host = cli.host_config()?;
    logging::init(&host.log_level);

    let installation = PrefixInstallation::new(&host.emulator_prefix, host.effective_loader());
    info!(
        prefix = %installation.prefix().display(),
        storage = %host.storage_root.display(),
        "vmdeck starting"
    );
    let manager = LifecycleManager::new(
        host.lifecycle_settings(),
        Arc::new(installation),
        Arc::new(NoContentResolver),
    );

    match cli.command {
        Command::List { json } => list(&manager, json),
        Command::Create(args) => {
            let machine = args.into_machine();
            manager.save(&machine).context("failed to store machine")?;
            println!("{}", machine.id);
            Ok(())
        }
        Command::Delete { id } => {
            manager
                .delete(&id)
                .await
                .with_context(|| format!("failed to delete machine {id}"))?;
            println!("deleted {id}");
            Ok(())
        }
        Command::Start { id } => start(&manager, &id).await,
        Command::Attach(args) => {
            let port = match (args.port, &args.id) {
                (Some(port), _) => port,
                (None, Some(id)) => manager.machine(id)?.display_port,
                (None, None) => bail!("either a machine id or --port is required"),
            };
            attach(&args.host, port, 1, args.text.as_deref()).await
        }
        Command::Run { id, text } => run(&manager, &id, text.as_deref()).await,
        Command::Console => console(&manager).await,
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn list(manager: &LifecycleManager, json: bool) -> anyhow::Result<()> {
    let machines = manager.machines().context("failed to read machine records")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&machines)?);
        return Ok(());
    }
    print_machines(manager, &machines);
    Ok(())
}

fn print_machines(manager: &LifecycleManager, machines: &[MachineConfig]) {
    if machines.is_empty() {
        println!("no machines");
        return;
    }
    for m in machines {
        println!(
            "{:<36}  {:<16}  {:<7}  {:<14}  {:>6} MiB  :{:<5}  {}",
            m.id,
            m.name,
            m.arch,
            m.os,
            m.memory_mib,
            m.display_port,
            state_label(manager.state(&m.id)),
        );
    }
}

fn state_label(state: MachineState) -> &'static str {
    match state {
        MachineState::Stopped => "stopped",
        MachineState::Starting => "starting",
        MachineState::Running => "running",
    }
}

async fn start(manager: &LifecycleManager, id: &str) -> anyhow::Result<()> {
    let port = manager
        .start_saved(id)
        .await
        .with_context(|| format!("failed to start machine {id}"))?;
    println!("machine {id} running, display on 127.0.0.1:{port}; Ctrl+C stops it");

    let mut ticker = tokio::time::interval(SUPERVISE_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.stop(id).await;
                break;
            }
            _ = ticker.tick() => {
                if manager.state(id) != MachineState::Running {
                    warn!(machine = %id, "emulator exited");
                    break;
                }
            }
        }
    }
    Ok(())
}

async fn run(manager: &LifecycleManager, id: &str, text: Option<&str>) -> anyhow::Result<()> {
    let port = manager
        .start_saved(id)
        .await
        .with_context(|| format!("failed to start machine {id}"))?;
    let result = attach("127.0.0.1", port, ATTACH_ATTEMPTS, text).await;
    manager.stop(id).await;
    result
}

/// Connects a viewer and logs frame geometry until Ctrl+C or session end.
async fn attach(host: &str, port: u16, attempts: u32, text: Option<&str>) -> anyhow::Result<()> {
    let session = connect_with_retry(host, port, attempts).await?;

    if let Some(text) = text {
        InputForwarder::new(session.clone()).type_text(text).await;
    }

    let mut frames = session.frames();
    let mut geometry = None;
    let mut ticker = tokio::time::interval(SUPERVISE_INTERVAL);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = frames
                    .borrow_and_update()
                    .as_ref()
                    .map(|frame| (frame.width(), frame.height()));
                if current.is_some() && current != geometry {
                    if let Some((width, height)) = current {
                        info!(width, height, "display geometry");
                    }
                    geometry = current;
                }
            }
            _ = ticker.tick() => {
                if let SessionState::Failed(reason) = session.state() {
                    session.disconnect().await;
                    bail!("viewer session failed: {reason}");
                }
            }
        }
    }
    session.disconnect().await;
    Ok(())
}

async fn connect_with_retry(host: &str, port: u16, attempts: u32) -> anyhow::Result<Arc<RfbSession>> {
    let mut attempt = 1;
    loop {
        let session = Arc::new(RfbSession::new(SessionConfig::default()));
        match session.connect(host, port).await {
            Ok(desktop) => {
                println!(
                    "connected to {:?} ({}x{}, RFB {}.{})",
                    desktop.name,
                    desktop.width,
                    desktop.height,
                    desktop.version.major,
                    desktop.version.minor
                );
                return Ok(session);
            }
            Err(e) if attempt < attempts => {
                warn!(port, attempt, error = %e, "display not ready; retrying");
                attempt += 1;
                tokio::time::sleep(ATTACH_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to connect to {host}:{port}"))
            }
        }
    }
}

async fn console(manager: &LifecycleManager) -> anyhow::Result<()> {
    println!("vmdeck console; type `help` for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("vmdeck> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            continue;
        };
        let arg = words.next();

        match (command, arg) {
            ("quit" | "exit", _) => break,
            ("help", _) => {
                println!("list | start <id> | stop <id> | state <id> | delete <id> | quit");
            }
            ("list", _) => match manager.machines() {
                Ok(machines) => print_machines(manager, &machines),
                Err(e) => println!("error: {e}"),
            },
            ("start", Some(id)) => match manager.start_saved(id).await {
                Ok(port) => println!("{id} running, display on 127.0.0.1:{port}"),
                Err(e) => println!("error: {e}"),
            },
            ("stop", Some(id)) => {
                if manager.stop(id).await {
                    println!("{id} stopping");
                } else {
                    println!("{id} is not running");
                }
            }
            ("state", Some(id)) => println!("{}", state_label(manager.state(id))),
            ("delete", Some(id)) => match manager.delete(id).await {
                Ok(()) => println!("deleted {id}"),
                Err(e) => println!("error: {e}"),
            },
            ("start" | "stop" | "state" | "delete", None) => println!("usage: {command} <id>"),
            _ => println!("unknown command {command:?}; type `help`"),
        }
    }
    // Machines started here do not outlive the console.
    manager.stop_all().await;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_defaults_follow_os_preset() {
        // Arrange
        let cli = Cli::parse_from(["vmdeck", "create", "Debian", "--os", "linux"]);

        // Act
        let Command::Create(args) = cli.command else {
            panic!("expected create");
        };
        let machine = args.into_machine();

        // Assert
        assert_eq!(machine.name, "Debian");
        assert_eq!(machine.arch, Architecture::X86_64);
        assert_eq!(machine.memory_mib, 1024);
        assert_eq!(machine.display_port, 5900);
        assert!(machine.acpi);
    }

    #[test]
    fn test_create_flags_override_preset() {
        let cli = Cli::parse_from([
            "vmdeck",
            "create",
            "xp",
            "--arch",
            "i386",
            "--os",
            "windows-legacy",
            "--memory",
            "384",
            "--boot-order",
            "cd-only",
            "--video",
            "std",
            "--no-acpi",
            "--display-port",
            "5903",
        ]);

        let Command::Create(args) = cli.command else {
            panic!("expected create");
        };
        let machine = args.into_machine();

        assert_eq!(machine.arch, Architecture::X86);
        assert_eq!(machine.os, OsFamily::LegacyWindows);
        assert_eq!(machine.memory_mib, 384);
        assert_eq!(machine.boot_order, BootOrder::CdOnly);
        assert_eq!(machine.video, VideoAdapter::Std);
        assert!(!machine.acpi);
        assert_eq!(machine.display_index(), 3);
    }

    #[test]
    fn test_attach_accepts_port_without_id() {
        let cli = Cli::parse_from(["vmdeck", "attach", "--port", "5901", "--type", "ls"]);

        let Command::Attach(args) = cli.command else {
            panic!("expected attach");
        };
        assert_eq!(args.port, Some(5901));
        assert_eq!(args.id, None);
        assert_eq!(args.text.as_deref(), Some("ls"));
    }

    #[test]
    fn test_attach_without_id_or_port_is_rejected() {
        assert!(Cli::try_parse_from(["vmdeck", "attach"]).is_err());
    }

    #[test]
    fn test_storage_root_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("vmdeck.toml");
        std::fs::write(&file, "storage_root = \"/from/file\"\nstartup_probe_ms = 900\n").unwrap();
        let cli = Cli::parse_from([
            "vmdeck",
            "--config",
            file.to_str().unwrap(),
            "--storage-root",
            "/from/flag",
            "list",
        ]);

        let host = cli.host_config().expect("config");

        assert_eq!(host.storage_root, PathBuf::from("/from/flag"));
        assert_eq!(host.startup_probe_ms, 900);
    }
}
