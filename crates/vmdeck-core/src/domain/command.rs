//! Emulator command-line construction.
//!
//! [`build_command`] maps a [`MachineConfig`] and a resolved disk path to the
//! exact argument vector QEMU is launched with.  The output is deterministic
//! for a given input; the only observation of the outside world is whether
//! the configured boot media exists, and callers that need full purity can
//! supply their own probe through [`build_command_with_probe`].
//!
//! Every choice is tuned for software emulation (TCG): a single vCPU, simple
//! CPU models and devices the guest OS ships drivers for.

use std::path::{Path, PathBuf};

use tracing::warn;

use super::machine::{Architecture, BootOrder, DiskFormat, MachineConfig, OsFamily};

/// Where the emulator installation keeps its binaries and firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorLayout {
    /// Directory holding `qemu-system-*` and `qemu-img`.
    pub bin_dir: PathBuf,
    /// BIOS / option-ROM directory passed with `-L`.
    pub firmware_dir: PathBuf,
}

impl EmulatorLayout {
    /// Standard layout below an installation prefix: `bin/` and
    /// `share/qemu/`.
    pub fn from_prefix(prefix: &Path) -> Self {
        Self {
            bin_dir: prefix.join("bin"),
            firmware_dir: prefix.join("share").join("qemu"),
        }
    }

    /// Full path of the emulator binary for the given architecture.
    pub fn emulator_path(&self, arch: Architecture) -> PathBuf {
        self.bin_dir.join(arch.emulator_binary())
    }

    /// Full path of the disk image utility.
    pub fn image_tool_path(&self) -> PathBuf {
        self.bin_dir.join("qemu-img")
    }
}

/// A program and its ordered arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Returns the argument that follows the first occurrence of `flag`.
    pub fn value_of(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|arg| arg == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    /// Returns every argument that follows an occurrence of `flag`.
    pub fn values_of<'a>(&'a self, flag: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.args
            .windows(2)
            .filter(move |pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
    }

    /// Returns `true` if `flag` appears anywhere in the arguments.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.args.iter().any(|arg| arg == flag)
    }

    /// Program followed by its arguments, as a single printable line.
    pub fn display(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Builds the emulator invocation for `config` with the disk at `disk`.
///
/// Boot media is attached only if the path exists on the local filesystem;
/// a missing file is logged and skipped.
pub fn build_command(config: &MachineConfig, disk: &Path, layout: &EmulatorLayout) -> CommandLine {
    build_command_with_probe(config, disk, layout, |path| path.exists())
}

/// Same as [`build_command`], with the boot-media existence check supplied
/// by the caller.
pub fn build_command_with_probe<F>(
    config: &MachineConfig,
    disk: &Path,
    layout: &EmulatorLayout,
    media_exists: F,
) -> CommandLine
where
    F: Fn(&Path) -> bool,
{
    let mut args: Vec<String> = Vec::with_capacity(48);
    // An empty value emits a bare flag.
    let mut push = |flag: &str, value: String| {
        args.push(flag.to_string());
        if !value.is_empty() {
            args.push(value);
        }
    };

    push("-L", layout.firmware_dir.display().to_string());

    let (machine, cpu) = if config.arch.is_arm() {
        ("virt,accel=tcg", "cortex-a53")
    } else {
        ("pc,accel=tcg", "qemu64")
    };
    push("-machine", machine.to_string());
    push("-cpu", cpu.to_string());

    // One vCPU outruns several under TCG.
    push("-m", format!("{}M", config.memory_mib));
    push("-smp", "1".to_string());

    if !config.acpi {
        push("-no-acpi", String::new());
    }

    push("-vga", config.video.resolve(config.os).to_string());
    push("-display", "none".to_string());

    let format = DiskFormat::from_path(disk).token();
    let drive = match config.os {
        OsFamily::Linux => format!("file={},format={format},if=virtio", disk.display()),
        OsFamily::LegacyWindows | OsFamily::ModernWindows | OsFamily::Other => format!(
            "file={},format={format},if=ide,index=0,media=disk",
            disk.display()
        ),
    };
    push("-drive", drive);

    let mut boot_letters = config.boot_order.drive_letters();
    if let Some(media) = config.boot_media.as_deref() {
        let path = Path::new(media);
        if media_exists(path) {
            push("-cdrom", media.to_string());
            boot_letters = BootOrder::CdOnly.drive_letters();
        } else {
            warn!(machine = %config.id, media, "boot media not found; starting without CD-ROM");
        }
    }
    push("-boot", format!("order={boot_letters},menu=on"));

    push("-vnc", format!(":{}", config.display_index()));

    let nic = match config.os {
        OsFamily::LegacyWindows => "rtl8139",
        OsFamily::Linux => "virtio-net-pci",
        OsFamily::ModernWindows | OsFamily::Other => "e1000",
    };
    push("-netdev", "user,id=net0".to_string());
    push("-device", format!("{nic},netdev=net0"));

    if config.audio {
        if config.os == OsFamily::LegacyWindows {
            push("-device", "AC97".to_string());
        } else {
            push("-device", "intel-hda".to_string());
            push("-device", "hda-duplex".to_string());
        }
    }

    push("-usb", String::new());
    push("-device", "usb-tablet".to_string());
    push("-rtc", "base=localtime,clock=host".to_string());

    if config.hardware_acceleration {
        push("-enable-kvm", String::new());
    }

    CommandLine {
        program: layout.emulator_path(config.arch),
        args,
    }
}
