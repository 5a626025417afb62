//! The declarative description of one virtual machine.
//!
//! A [`MachineConfig`] is a value object.  It is created by the caller,
//! persisted by the host crate and loaded back unchanged; an edit produces a
//! new value that keeps the same `id`.
//!
//! Every enumerated attribute (architecture, OS family, boot order, video
//! adapter) is stored on disk as a short lowercase token such as `x86_64` or
//! `disk-then-cd`.  The tokens double as the values accepted on the command
//! line, so each enum implements [`FromStr`] and [`fmt::Display`] with the
//! same spelling.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// TCP port that serves display index 0 (`port = 5900 + index`).
pub const BASE_DISPLAY_PORT: u16 = 5900;

/// Errors produced while validating or parsing a machine description.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The machine id is empty or whitespace.
    #[error("machine id must not be empty")]
    EmptyId,

    /// A size or count field is zero.
    #[error("{field} must be a positive integer")]
    NotPositive { field: &'static str },

    /// The display port maps to a negative display index.
    #[error("display port {0} is below {BASE_DISPLAY_PORT}")]
    DisplayPortOutOfRange(u16),

    /// A token did not name any variant of the enumerated attribute.
    #[error("unknown {kind}: {value:?}")]
    UnknownToken { kind: &'static str, value: String },
}

// ── Token plumbing ────────────────────────────────────────────────────────────

/// Wires `Display` and the serde string conversions to an enum's `token()`
/// and `FromStr` implementations.
macro_rules! token_conversions {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.token())
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.token().to_string()
            }
        }
    };
}

// ── Architecture ──────────────────────────────────────────────────────────────

/// Guest CPU architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Architecture {
    /// 64-bit x86 (`x86_64`).
    #[default]
    X86_64,
    /// 32-bit x86 (`i386`).
    X86,
    /// 64-bit ARM (`aarch64`).
    Aarch64,
    /// 32-bit ARM (`arm`).
    Arm,
}

impl Architecture {
    /// Every architecture, in display order.
    pub const ALL: [Architecture; 4] = [
        Architecture::X86_64,
        Architecture::X86,
        Architecture::Aarch64,
        Architecture::Arm,
    ];

    /// The persisted token for this architecture.
    pub fn token(self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::X86 => "i386",
            Architecture::Aarch64 => "aarch64",
            Architecture::Arm => "arm",
        }
    }

    /// Returns `true` for both ARM variants.
    pub fn is_arm(self) -> bool {
        matches!(self, Architecture::Aarch64 | Architecture::Arm)
    }

    /// File name of the emulator binary that runs guests of this
    /// architecture.
    ///
    /// The 64-bit emulators execute 32-bit guests as well, so both x86
    /// variants share one binary and both ARM variants share another.
    pub fn emulator_binary(self) -> &'static str {
        if self.is_arm() {
            "qemu-system-aarch64"
        } else {
            "qemu-system-x86_64"
        }
    }
}

impl FromStr for Architecture {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "i386" | "x86" | "i686" => Ok(Architecture::X86),
            "aarch64" | "arm64" => Ok(Architecture::Aarch64),
            "arm" => Ok(Architecture::Arm),
            _ => Err(ConfigError::UnknownToken {
                kind: "architecture",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for Architecture {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

token_conversions!(Architecture);

// ── OS family ─────────────────────────────────────────────────────────────────

/// Default sizing for a guest OS family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsPreset {
    pub display_name: &'static str,
    pub min_memory_mib: u32,
    pub recommended_memory_mib: u32,
    pub min_disk_mib: u32,
}

/// Hint about the guest operating system.
///
/// The family drives default sizing and the choice of emulated devices:
/// guests without para-virtualized drivers get devices they support out of
/// the box.  Any token this build does not recognise reads back as
/// [`OsFamily::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OsFamily {
    /// Windows 98 / 2000 / XP era guests.
    LegacyWindows,
    /// Windows 7 and later.
    ModernWindows,
    Linux,
    #[default]
    Other,
}

impl OsFamily {
    pub const ALL: [OsFamily; 4] = [
        OsFamily::LegacyWindows,
        OsFamily::ModernWindows,
        OsFamily::Linux,
        OsFamily::Other,
    ];

    pub fn token(self) -> &'static str {
        match self {
            OsFamily::LegacyWindows => "windows-legacy",
            OsFamily::ModernWindows => "windows",
            OsFamily::Linux => "linux",
            OsFamily::Other => "other",
        }
    }

    /// Returns `true` for both Windows families.
    pub fn is_windows(self) -> bool {
        matches!(self, OsFamily::LegacyWindows | OsFamily::ModernWindows)
    }

    /// Sizing defaults for this family.
    pub fn preset(self) -> OsPreset {
        match self {
            OsFamily::LegacyWindows => OsPreset {
                display_name: "Windows 98 / 2000 / XP",
                min_memory_mib: 256,
                recommended_memory_mib: 512,
                min_disk_mib: 4096,
            },
            OsFamily::ModernWindows => OsPreset {
                display_name: "Windows 7 / 10 / 11",
                min_memory_mib: 2048,
                recommended_memory_mib: 4096,
                min_disk_mib: 40960,
            },
            OsFamily::Linux => OsPreset {
                display_name: "Linux",
                min_memory_mib: 256,
                recommended_memory_mib: 1024,
                min_disk_mib: 8192,
            },
            OsFamily::Other => OsPreset {
                display_name: "Other",
                min_memory_mib: 256,
                recommended_memory_mib: 512,
                min_disk_mib: 4096,
            },
        }
    }
}

impl FromStr for OsFamily {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "windows-legacy" | "windows_legacy" | "winxp" => Ok(OsFamily::LegacyWindows),
            "windows" | "windows-modern" | "win10" => Ok(OsFamily::ModernWindows),
            "linux" => Ok(OsFamily::Linux),
            "other" => Ok(OsFamily::Other),
            _ => Err(ConfigError::UnknownToken {
                kind: "OS family",
                value: s.to_string(),
            }),
        }
    }
}

impl From<String> for OsFamily {
    fn from(value: String) -> Self {
        value.parse().unwrap_or(OsFamily::Other)
    }
}

token_conversions!(OsFamily);

// ── Boot order ────────────────────────────────────────────────────────────────

/// Which device the firmware tries first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BootOrder {
    #[default]
    DiskThenCd,
    CdThenDisk,
    CdOnly,
}

impl BootOrder {
    pub fn token(self) -> &'static str {
        match self {
            BootOrder::DiskThenCd => "disk-then-cd",
            BootOrder::CdThenDisk => "cd-then-disk",
            BootOrder::CdOnly => "cd-only",
        }
    }

    /// Drive letters in the emulator's `-boot order=` syntax
    /// (`c` = first hard disk, `d` = first CD-ROM).
    pub fn drive_letters(self) -> &'static str {
        match self {
            BootOrder::DiskThenCd => "cd",
            BootOrder::CdThenDisk => "dc",
            BootOrder::CdOnly => "d",
        }
    }
}

impl FromStr for BootOrder {
    type Err = ConfigError;

    /// Accepts the descriptive tokens as well as raw drive letters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disk-then-cd" | "cd" => Ok(BootOrder::DiskThenCd),
            "cd-then-disk" | "dc" => Ok(BootOrder::CdThenDisk),
            "cd-only" | "d" => Ok(BootOrder::CdOnly),
            _ => Err(ConfigError::UnknownToken {
                kind: "boot order",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for BootOrder {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

token_conversions!(BootOrder);

// ── Video adapter ─────────────────────────────────────────────────────────────

/// Emulated graphics adapter.
///
/// [`VideoAdapter::Auto`] defers to the OS family: Linux gets the
/// para-virtualized adapter, legacy Windows gets Cirrus (in-box XP driver)
/// and everything else gets the standard VGA adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VideoAdapter {
    #[default]
    Auto,
    Std,
    Cirrus,
    Vmware,
    Qxl,
    Virtio,
}

impl VideoAdapter {
    pub fn token(self) -> &'static str {
        match self {
            VideoAdapter::Auto => "auto",
            VideoAdapter::Std => "std",
            VideoAdapter::Cirrus => "cirrus",
            VideoAdapter::Vmware => "vmware",
            VideoAdapter::Qxl => "qxl",
            VideoAdapter::Virtio => "virtio",
        }
    }

    /// The `-vga` value for a guest of the given family.
    pub fn resolve(self, os: OsFamily) -> &'static str {
        match self {
            VideoAdapter::Auto => match os {
                OsFamily::Linux => "virtio",
                OsFamily::LegacyWindows => "cirrus",
                OsFamily::ModernWindows | OsFamily::Other => "std",
            },
            VideoAdapter::Std => "std",
            VideoAdapter::Cirrus => "cirrus",
            VideoAdapter::Vmware => "vmware",
            VideoAdapter::Qxl => "qxl",
            VideoAdapter::Virtio => "virtio",
        }
    }
}

impl FromStr for VideoAdapter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" | "" => Ok(VideoAdapter::Auto),
            "std" => Ok(VideoAdapter::Std),
            "cirrus" => Ok(VideoAdapter::Cirrus),
            "vmware" => Ok(VideoAdapter::Vmware),
            "qxl" => Ok(VideoAdapter::Qxl),
            "virtio" => Ok(VideoAdapter::Virtio),
            _ => Err(ConfigError::UnknownToken {
                kind: "video adapter",
                value: s.to_string(),
            }),
        }
    }
}

impl TryFrom<String> for VideoAdapter {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

token_conversions!(VideoAdapter);

// ── Disk format ───────────────────────────────────────────────────────────────

/// On-disk format of a disk image, inferred from its file suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskFormat {
    /// Copy-on-write image (`.qcow2`).
    Qcow2,
    /// Flat file; also used for any unrecognised suffix.
    Raw,
}

impl DiskFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("qcow2") => DiskFormat::Qcow2,
            _ => DiskFormat::Raw,
        }
    }

    /// The `format=` token the emulator expects.
    pub fn token(self) -> &'static str {
        match self {
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Raw => "raw",
        }
    }

    /// File suffix used for newly provisioned images.
    pub fn extension(self) -> &'static str {
        match self {
            DiskFormat::Qcow2 => "qcow2",
            DiskFormat::Raw => "img",
        }
    }
}

// ── MachineConfig ─────────────────────────────────────────────────────────────

/// Declarative description of one virtual machine.
///
/// Missing fields fall back to the defaults below when a persisted record is
/// read, and empty optional paths read back as `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Opaque unique identifier; immutable once created.
    pub id: String,

    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default)]
    pub arch: Architecture,

    #[serde(default)]
    pub os: OsFamily,

    #[serde(default = "default_memory_mib")]
    pub memory_mib: u32,

    /// Configured vCPU count.  The command builder pins the emulator to one
    /// vCPU regardless.
    #[serde(default = "default_cpus")]
    pub cpus: u32,

    #[serde(default = "default_disk_size_mib")]
    pub disk_size_mib: u32,

    /// Existing disk image to attach instead of a provisioned one.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub disk_image: Option<String>,

    /// Removable boot media (ISO): a filesystem path or a `scheme://` URI.
    #[serde(
        default,
        deserialize_with = "empty_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub boot_media: Option<String>,

    #[serde(default = "default_display_port")]
    pub display_port: u16,

    #[serde(default)]
    pub hardware_acceleration: bool,

    #[serde(default)]
    pub boot_order: BootOrder,

    #[serde(default = "default_true")]
    pub acpi: bool,

    #[serde(default)]
    pub video: VideoAdapter,

    #[serde(default)]
    pub audio: bool,
}

fn default_name() -> String {
    "Untitled".to_string()
}

fn default_memory_mib() -> u32 {
    512
}

fn default_cpus() -> u32 {
    2
}

fn default_disk_size_mib() -> u32 {
    4096
}

fn default_display_port() -> u16 {
    BASE_DISPLAY_PORT
}

fn default_true() -> bool {
    true
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.trim().is_empty()))
}

impl MachineConfig {
    /// Creates a machine with a fresh UUID v4 id and sizing taken from the
    /// OS family's preset.
    pub fn new(name: impl Into<String>, arch: Architecture, os: OsFamily) -> Self {
        let preset = os.preset();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arch,
            os,
            memory_mib: preset.recommended_memory_mib,
            cpus: default_cpus(),
            disk_size_mib: preset.min_disk_mib,
            disk_image: None,
            boot_media: None,
            display_port: BASE_DISPLAY_PORT,
            hardware_acceleration: false,
            boot_order: BootOrder::default(),
            acpi: true,
            video: VideoAdapter::Auto,
            audio: false,
        }
    }

    /// Checks the invariants every stored or launched machine must satisfy.
    ///
    /// # Errors
    ///
    /// Returns the first violated invariant.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.id.trim().is_empty() {
            return Err(ConfigError::EmptyId);
        }
        if self.memory_mib == 0 {
            return Err(ConfigError::NotPositive { field: "memory_mib" });
        }
        if self.cpus == 0 {
            return Err(ConfigError::NotPositive { field: "cpus" });
        }
        if self.disk_size_mib == 0 {
            return Err(ConfigError::NotPositive {
                field: "disk_size_mib",
            });
        }
        if self.display_port < BASE_DISPLAY_PORT {
            return Err(ConfigError::DisplayPortOutOfRange(self.display_port));
        }
        Ok(())
    }

    /// The VNC display index served on [`Self::display_port`].
    pub fn display_index(&self) -> u16 {
        self.display_port.saturating_sub(BASE_DISPLAY_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_applies_os_family_preset() {
        // Arrange / Act
        let config = MachineConfig::new("win", Architecture::X86_64, OsFamily::ModernWindows);

        // Assert
        assert_eq!(config.memory_mib, 4096);
        assert_eq!(config.disk_size_mib, 40960);
        assert_eq!(config.display_port, 5900);
        assert_eq!(config.boot_order, BootOrder::DiskThenCd);
        assert!(config.acpi);
        assert!(!config.audio);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_new_generates_distinct_ids() {
        let a = MachineConfig::new("a", Architecture::X86_64, OsFamily::Linux);
        let b = MachineConfig::new("b", Architecture::X86_64, OsFamily::Linux);

        assert_ne!(a.id, b.id);
        assert!(Uuid::parse_str(&a.id).is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_memory() {
        // Arrange
        let mut config = MachineConfig::new("vm", Architecture::X86_64, OsFamily::Linux);
        config.memory_mib = 0;

        // Act
        let result = config.validate();

        // Assert
        assert_eq!(
            result,
            Err(ConfigError::NotPositive { field: "memory_mib" })
        );
    }

    #[test]
    fn test_validate_rejects_port_below_display_base() {
        let mut config = MachineConfig::new("vm", Architecture::X86_64, OsFamily::Linux);
        config.display_port = 5899;

        assert_eq!(
            config.validate(),
            Err(ConfigError::DisplayPortOutOfRange(5899))
        );
    }

    #[test]
    fn test_validate_rejects_blank_id() {
        let mut config = MachineConfig::new("vm", Architecture::X86_64, OsFamily::Linux);
        config.id = "  ".to_string();

        assert_eq!(config.validate(), Err(ConfigError::EmptyId));
    }

    #[test]
    fn test_display_index_is_offset_from_5900() {
        let mut config = MachineConfig::new("vm", Architecture::X86_64, OsFamily::Linux);
        config.display_port = 5903;

        assert_eq!(config.display_index(), 3);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        // Arrange
        let text = "id = \"abc\"\n";

        // Act
        let config: MachineConfig = toml::from_str(text).expect("minimal record must parse");

        // Assert
        assert_eq!(config.id, "abc");
        assert_eq!(config.name, "Untitled");
        assert_eq!(config.arch, Architecture::X86_64);
        assert_eq!(config.os, OsFamily::Other);
        assert_eq!(config.memory_mib, 512);
        assert_eq!(config.display_port, 5900);
        assert!(config.acpi);
    }

    #[test]
    fn test_empty_paths_read_back_as_none() {
        let text = "id = \"abc\"\ndisk_image = \"\"\nboot_media = \"  \"\n";

        let config: MachineConfig = toml::from_str(text).expect("record must parse");

        assert_eq!(config.disk_image, None);
        assert_eq!(config.boot_media, None);
    }

    #[test]
    fn test_unknown_os_family_reads_back_as_other() {
        let text = "id = \"abc\"\nos = \"beos\"\n";

        let config: MachineConfig = toml::from_str(text).expect("record must parse");

        assert_eq!(config.os, OsFamily::Other);
    }

    #[test]
    fn test_unknown_architecture_is_a_parse_error() {
        let text = "id = \"abc\"\narch = \"sparc\"\n";

        let result: Result<MachineConfig, _> = toml::from_str(text);

        assert!(result.is_err());
    }

    #[test]
    fn test_persisted_tokens_survive_a_save_and_load() {
        // Arrange
        let mut config = MachineConfig::new("xp", Architecture::X86, OsFamily::LegacyWindows);
        config.boot_order = BootOrder::CdOnly;
        config.video = VideoAdapter::Vmware;
        config.boot_media = Some("/sdcard/xp.iso".to_string());

        // Act
        let text = toml::to_string(&config).expect("serialize");
        let loaded: MachineConfig = toml::from_str(&text).expect("deserialize");

        // Assert
        assert!(text.contains("arch = \"i386\""));
        assert!(text.contains("os = \"windows-legacy\""));
        assert!(text.contains("boot_order = \"cd-only\""));
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_boot_order_accepts_drive_letters() {
        assert_eq!("dc".parse::<BootOrder>(), Ok(BootOrder::CdThenDisk));
        assert_eq!("cd".parse::<BootOrder>(), Ok(BootOrder::DiskThenCd));
        assert_eq!("d".parse::<BootOrder>(), Ok(BootOrder::CdOnly));
    }

    #[test]
    fn test_disk_format_is_inferred_from_suffix() {
        assert_eq!(DiskFormat::from_path(Path::new("/a/b.qcow2")), DiskFormat::Qcow2);
        assert_eq!(DiskFormat::from_path(Path::new("/a/b.QCOW2")), DiskFormat::Qcow2);
        assert_eq!(DiskFormat::from_path(Path::new("/a/b.img")), DiskFormat::Raw);
        assert_eq!(DiskFormat::from_path(Path::new("/a/b")), DiskFormat::Raw);
    }

    #[test]
    fn test_auto_video_follows_os_family() {
        assert_eq!(VideoAdapter::Auto.resolve(OsFamily::Linux), "virtio");
        assert_eq!(VideoAdapter::Auto.resolve(OsFamily::LegacyWindows), "cirrus");
        assert_eq!(VideoAdapter::Auto.resolve(OsFamily::ModernWindows), "std");
        assert_eq!(VideoAdapter::Auto.resolve(OsFamily::Other), "std");
        assert_eq!(VideoAdapter::Qxl.resolve(OsFamily::Linux), "qxl");
    }
}
