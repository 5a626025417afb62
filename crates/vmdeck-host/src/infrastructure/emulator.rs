//! The boundary to the emulator installation.
//!
//! vmdeck does not install QEMU itself.  It only needs to know whether the
//! emulator binary for an architecture is present and executable, where the
//! binaries live, and how to run them.  [`EmulatorInstallation`] is that
//! boundary; [`PrefixInstallation`] is the implementation for a conventional
//! `<prefix>/bin` + `<prefix>/share/qemu` + `<prefix>/lib` tree.

use std::path::{Path, PathBuf};

use vmdeck_core::{Architecture, EmulatorLayout};

/// Facts about the emulator installation the lifecycle manager relies on.
#[cfg_attr(test, mockall::automock)]
pub trait EmulatorInstallation: Send + Sync {
    /// Whether the emulator binary for `arch` exists and is executable.
    fn is_present(&self, arch: Architecture) -> bool;

    /// Binary and firmware directories.
    fn layout(&self) -> EmulatorLayout;

    /// Dynamic linker to run binaries through, if the platform needs one.
    fn loader(&self) -> Option<PathBuf>;

    /// Environment overrides for processes started from this installation.
    fn environment(&self) -> Vec<(String, String)>;
}

/// An installation rooted at a filesystem prefix such as `/usr` or
/// `$PREFIX` of an on-device package manager.
#[derive(Debug, Clone)]
pub struct PrefixInstallation {
    prefix: PathBuf,
    loader: Option<PathBuf>,
}

impl PrefixInstallation {
    pub fn new(prefix: impl Into<PathBuf>, loader: Option<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
            loader,
        }
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }
}

impl EmulatorInstallation for PrefixInstallation {
    fn is_present(&self, arch: Architecture) -> bool {
        is_executable(&self.layout().emulator_path(arch))
    }

    fn layout(&self) -> EmulatorLayout {
        EmulatorLayout::from_prefix(&self.prefix)
    }

    fn loader(&self) -> Option<PathBuf> {
        self.loader.clone()
    }

    fn environment(&self) -> Vec<(String, String)> {
        let lib = self.prefix.join("lib");
        let bin = self.prefix.join("bin");
        let path = match std::env::var("PATH") {
            Ok(inherited) if !inherited.is_empty() => format!("{}:{inherited}", bin.display()),
            _ => bin.display().to_string(),
        };
        vec![
            ("LD_LIBRARY_PATH".to_string(), lib.display().to_string()),
            ("PATH".to_string(), path),
        ]
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
