//! Persisted machine descriptions, one TOML record per machine.
//!
//! Layout: `<storage root>/configs/<id>.conf`.  A record looks like:
//!
//! ```toml
//! id = "4f7c..."
//! name = "Debian"
//! arch = "x86_64"
//! os = "linux"
//! memory_mib = 1024
//! boot_media = "/sdcard/debian.iso"
//! display_port = 5901
//! ```
//!
//! Missing fields take their documented defaults, so records written by an
//! older version still load.  A record that cannot be parsed is skipped with
//! a warning instead of hiding every other machine.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use vmdeck_core::{ConfigError, MachineConfig};

const RECORD_EXTENSION: &str = "conf";

/// Errors from the machine store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error accessing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse machine record {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize machine record: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid machine: {0}")]
    Invalid(#[from] ConfigError),

    /// The id cannot be used as a file name.
    #[error("machine id {0:?} is not a valid record name")]
    InvalidId(String),
}

/// Reads and writes machine records below a storage root.
#[derive(Debug, Clone)]
pub struct MachineStore {
    dir: PathBuf,
}

impl MachineStore {
    pub fn new(storage_root: &Path) -> Self {
        Self {
            dir: storage_root.join("configs"),
        }
    }

    /// Path of the record for `id`.
    pub fn record_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{id}.{RECORD_EXTENSION}")))
    }

    /// Validates and writes `config`, replacing any record with the same id.
    pub fn save(&self, config: &MachineConfig) -> Result<PathBuf, StoreError> {
        config.validate()?;
        let path = self.record_path(&config.id)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let content = toml::to_string_pretty(config)?;
        std::fs::write(&path, content).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;
        debug!(machine = %config.id, path = %path.display(), "machine saved");
        Ok(path)
    }

    /// Loads every readable record, sorted by name then id.
    ///
    /// A missing directory is an empty store.
    pub fn load(&self) -> Result<Vec<MachineConfig>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut machines = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            match read_record(&path) {
                Ok(config) => machines.push(config),
                Err(e) => warn!(error = %e, "skipping unreadable machine record"),
            }
        }
        machines.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(machines)
    }

    /// Loads one record, or `None` if it does not exist.
    pub fn get(&self, id: &str) -> Result<Option<MachineConfig>, StoreError> {
        let path = self.record_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        read_record(&path).map(Some)
    }

    /// Removes the record for `id`.  Returns whether a record existed.
    pub fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let path = self.record_path(id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}

fn read_record(path: &Path) -> Result<MachineConfig, StoreError> {
    let content = std::fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: MachineConfig = toml::from_str(&content).map_err(|source| StoreError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmdeck_core::{Architecture, BootOrder, OsFamily};

    fn store() -> (tempfile::TempDir, MachineStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = MachineStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_save_then_load_returns_equal_config() {
        // Arrange
        let (_dir, store) = store();
        let mut config = MachineConfig::new("Debian", Architecture::Aarch64, OsFamily::Linux);
        config.boot_media = Some("/media/debian.iso".into());
        config.boot_order = BootOrder::CdOnly;

        // Act
        store.save(&config).expect("save");
        let loaded = store.load().expect("load");

        // Assert
        assert_eq!(loaded, vec![config]);
    }

    #[test]
    fn test_load_of_missing_directory_is_empty() {
        let (_dir, store) = store();

        assert!(store.load().expect("load").is_empty());
    }

    #[test]
    fn test_corrupt_record_is_skipped() {
        // Arrange
        let (dir, store) = store();
        let good = MachineConfig::new("good", Architecture::X86_64, OsFamily::Other);
        store.save(&good).expect("save");
        std::fs::write(dir.path().join("configs/broken.conf"), "memory_mib = [[[").unwrap();
        std::fs::write(dir.path().join("configs/zero.conf"), "id = \"z\"\nmemory_mib = 0\n").unwrap();

        // Act
        let loaded = store.load().expect("load");

        // Assert
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, good.id);
    }

    #[test]
    fn test_minimal_record_uses_defaults_and_unknown_os_is_other() {
        let (dir, store) = store();
        std::fs::create_dir_all(dir.path().join("configs")).unwrap();
        std::fs::write(
            dir.path().join("configs/m1.conf"),
            "id = \"m1\"\nos = \"beos\"\nboot_media = \"\"\n",
        )
        .unwrap();

        let config = store.get("m1").expect("get").expect("present");

        assert_eq!(config.name, "Untitled");
        assert_eq!(config.os, OsFamily::Other);
        assert_eq!(config.memory_mib, 512);
        assert_eq!(config.display_port, 5900);
        assert!(config.acpi);
        assert_eq!(config.boot_media, None);
    }

    #[test]
    fn test_save_rejects_invalid_config() {
        let (_dir, store) = store();
        let mut config = MachineConfig::new("bad", Architecture::X86_64, OsFamily::Linux);
        config.cpus = 0;

        let result = store.save(&config);

        assert!(matches!(result, Err(StoreError::Invalid(_))));
    }

    #[test]
    fn test_path_like_ids_are_refused() {
        let (_dir, store) = store();

        assert!(matches!(store.get("../etc"), Err(StoreError::InvalidId(_))));
        assert!(matches!(store.delete(".."), Err(StoreError::InvalidId(_))));
    }

    #[test]
    fn test_delete_reports_whether_record_existed() {
        let (_dir, store) = store();
        let config = MachineConfig::new("x", Architecture::X86_64, OsFamily::Linux);
        store.save(&config).expect("save");

        assert!(store.delete(&config.id).expect("first delete"));
        assert!(!store.delete(&config.id).expect("second delete"));
        assert!(store.get(&config.id).expect("get").is_none());
    }
}
