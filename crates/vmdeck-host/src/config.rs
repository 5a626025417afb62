//! Host configuration, `vmdeck.toml`.
//!
//! Read from the platform config directory:
//! - Linux:   `$XDG_CONFIG_HOME/vmdeck/vmdeck.toml` or `~/.config/vmdeck/vmdeck.toml`
//! - macOS:   `~/Library/Application Support/vmdeck/vmdeck.toml`
//! - Windows: `%APPDATA%\vmdeck\vmdeck.toml`
//!
//! ```toml
//! storage_root = "/data/vmdeck"
//! emulator_prefix = "/data/data/com.termux/files/usr"
//! loader = "/system/bin/linker64"
//! startup_probe_ms = 2000
//! stop_grace_ms = 5000
//! log_level = "info"
//! ```
//!
//! Every field is optional.  A missing file means "all defaults", so the
//! tool works on first run without writing anything.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::lifecycle::LifecycleSettings;

const CONFIG_FILE_NAME: &str = "vmdeck.toml";

/// Dynamic linkers probed, in order, when no loader is configured.
const LOADER_CANDIDATES: [&str; 2] = ["/system/bin/linker64", "/system/bin/linker"];

/// Error type for host configuration file operations.
#[derive(Debug, Error)]
pub enum HostConfigError {
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Settings for the host side of vmdeck.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Root of `configs/` and `images/`.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Installation prefix holding `bin/qemu-system-*`, `bin/qemu-img`,
    /// `lib/` and `share/qemu/`.
    #[serde(default = "default_emulator_prefix")]
    pub emulator_prefix: PathBuf,

    /// Dynamic linker to launch emulator binaries through.  Auto-detected
    /// when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loader: Option<PathBuf>,

    #[serde(default = "default_startup_probe_ms")]
    pub startup_probe_ms: u64,

    /// Grace period before a stopped emulator is killed.  Absent means never.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_grace_ms: Option<u64>,

    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_storage_root() -> PathBuf {
    platform_data_dir().unwrap_or_else(|| PathBuf::from(".vmdeck"))
}

fn default_emulator_prefix() -> PathBuf {
    PathBuf::from("/usr")
}

fn default_startup_probe_ms() -> u64 {
    2000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            storage_root: default_storage_root(),
            emulator_prefix: default_emulator_prefix(),
            loader: None,
            startup_probe_ms: default_startup_probe_ms(),
            stop_grace_ms: None,
            log_level: default_log_level(),
        }
    }
}

impl HostConfig {
    /// The configured loader, or the first platform linker that exists.
    pub fn effective_loader(&self) -> Option<PathBuf> {
        self.loader.clone().or_else(|| {
            LOADER_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|candidate| candidate.is_file())
        })
    }

    pub fn lifecycle_settings(&self) -> LifecycleSettings {
        LifecycleSettings {
            storage_root: self.storage_root.clone(),
            startup_probe: Duration::from_millis(self.startup_probe_ms),
            stop_grace: self.stop_grace_ms.map(Duration::from_millis),
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Full path of `vmdeck.toml` in the platform config directory.
///
/// # Errors
///
/// Returns [`HostConfigError::NoPlatformConfigDir`] when the base directory
/// cannot be determined from the environment.
pub fn config_file_path() -> Result<PathBuf, HostConfigError> {
    platform_config_dir()
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .ok_or(HostConfigError::NoPlatformConfigDir)
}

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`HostConfigError::Io`] for file-system errors other than "not
/// found", and [`HostConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<HostConfig, HostConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HostConfig::default()),
        Err(source) => Err(HostConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Writes `config` to `path`, creating parent directories as needed.
pub fn save_config(path: &Path, config: &HostConfig) -> Result<(), HostConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| HostConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| HostConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("vmdeck"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("vmdeck")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("vmdeck"))
    }
}

fn platform_data_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("LOCALAPPDATA").map(|p| PathBuf::from(p).join("vmdeck"))
    }

    #[cfg(target_os = "macos")]
    {
        platform_config_dir()
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        let base = std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
            })?;
        Some(base.join("vmdeck"))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
