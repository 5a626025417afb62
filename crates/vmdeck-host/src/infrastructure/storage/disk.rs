//! Disk image provisioning.
//!
//! Each machine gets at most one image under `<storage root>/images/`:
//! `<id>.qcow2` when the image tool works, `<id>.img` (a sparse raw file)
//! when it does not.  Provisioning is idempotent, so an image is never
//! re-created or truncated once it exists.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};
use vmdeck_core::DiskFormat;

use crate::infrastructure::process::Launcher;

const MIB: u64 = 1024 * 1024;

/// Errors from disk provisioning.  Only the raw fallback can fail.
#[derive(Debug, Error)]
pub enum DiskError {
    #[error("I/O error creating disk image {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Creates and finds per-machine disk images.
#[derive(Debug, Clone)]
pub struct DiskProvisioner {
    images_dir: PathBuf,
    image_tool: PathBuf,
    launcher: Launcher,
}

impl DiskProvisioner {
    /// `image_tool` is the `qemu-img` binary, run through `launcher`.
    pub fn new(
        images_dir: impl Into<PathBuf>,
        image_tool: impl Into<PathBuf>,
        launcher: Launcher,
    ) -> Self {
        Self {
            images_dir: images_dir.into(),
            image_tool: image_tool.into(),
            launcher,
        }
    }

    /// Path of the existing image for `machine_id`, if any.
    pub fn existing_disk(&self, machine_id: &str) -> Option<PathBuf> {
        [DiskFormat::Qcow2, DiskFormat::Raw]
            .into_iter()
            .map(|format| self.image_path(machine_id, format))
            .find(|path| path.is_file())
    }

    /// Returns the image for `machine_id`, creating one of `size_mib` MiB if
    /// none exists yet.
    ///
    /// A copy-on-write image is tried first.  If the image tool exits with a
    /// failure, cannot be started, or leaves no file behind, a sparse raw
    /// file of exactly `size_mib` MiB is allocated instead.
    ///
    /// # Errors
    ///
    /// Returns [`DiskError::Io`] only when the raw fallback itself fails.
    pub async fn ensure_disk(&self, machine_id: &str, size_mib: u32) -> Result<PathBuf, DiskError> {
        if let Some(existing) = self.existing_disk(machine_id) {
            debug!(machine = %machine_id, path = %existing.display(), "reusing disk image");
            return Ok(existing);
        }

        tokio::fs::create_dir_all(&self.images_dir)
            .await
            .map_err(|source| DiskError::Io {
                path: self.images_dir.clone(),
                source,
            })?;

        let qcow2 = self.image_path(machine_id, DiskFormat::Qcow2);
        if self.create_qcow2(machine_id, &qcow2, size_mib).await {
            info!(machine = %machine_id, path = %qcow2.display(), size_mib, "created qcow2 disk image");
            return Ok(qcow2);
        }

        let raw = self.image_path(machine_id, DiskFormat::Raw);
        create_sparse(&raw, u64::from(size_mib) * MIB).await?;
        info!(machine = %machine_id, path = %raw.display(), size_mib, "created raw disk image");
        Ok(raw)
    }

    fn image_path(&self, machine_id: &str, format: DiskFormat) -> PathBuf {
        self.images_dir
            .join(format!("{machine_id}.{}", format.extension()))
    }

    async fn create_qcow2(&self, machine_id: &str, path: &Path, size_mib: u32) -> bool {
        let size = format!("{size_mib}M");
        let result = self
            .launcher
            .command(
                &self.image_tool,
                [
                    OsStr::new("create"),
                    OsStr::new("-f"),
                    OsStr::new("qcow2"),
                    path.as_os_str(),
                    OsStr::new(&size),
                ],
            )
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() && path.is_file() => true,
            Ok(output) if output.status.success() => {
                warn!(machine = %machine_id, "image tool reported success but wrote no file; falling back to raw");
                false
            }
            Ok(output) => {
                warn!(
                    machine = %machine_id,
                    status = %output.status,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "image tool failed; falling back to raw"
                );
                // A partial file would shadow the raw fallback on the next lookup.
                let _ = tokio::fs::remove_file(path).await;
                false
            }
            Err(e) => {
                warn!(machine = %machine_id, tool = %self.image_tool.display(), error = %e, "could not run image tool; falling back to raw");
                false
            }
        }
    }
}

async fn create_sparse(path: &Path, len: u64) -> Result<(), DiskError> {
    let io_err = |source| DiskError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = tokio::fs::File::create(path).await.map_err(io_err)?;
    file.set_len(len).await.map_err(io_err)?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    /// Writes an executable shell script standing in for `qemu-img`.
    fn fake_tool(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("qemu-img");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_creates_qcow2_through_image_tool() {
        // Arrange: the fake tool records its arguments and creates the file
        let dir = tempfile::tempdir().unwrap();
        let args_log = dir.path().join("args");
        let tool = fake_tool(
            dir.path(),
            &format!("echo \"$@\" > {}; : > \"$4\"", args_log.display()),
        );
        let provisioner = DiskProvisioner::new(dir.path().join("images"), tool, Launcher::default());

        // Act
        let path = provisioner.ensure_disk("m1", 2048).await.expect("disk");

        // Assert
        let expected = dir.path().join("images/m1.qcow2");
        assert_eq!(path, expected);
        let args = std::fs::read_to_string(args_log).unwrap();
        assert_eq!(args.trim(), format!("create -f qcow2 {} 2048M", expected.display()));
    }

    #[tokio::test]
    async fn test_failing_tool_falls_back_to_sparse_raw_of_exact_size() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), ": > \"$4\"; echo no space >&2; exit 1");
        let provisioner = DiskProvisioner::new(dir.path().join("images"), tool, Launcher::default());

        let path = provisioner.ensure_disk("m1", 3).await.expect("disk");

        assert_eq!(path, dir.path().join("images/m1.img"));
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 3 * MIB);
        assert!(!dir.path().join("images/m1.qcow2").exists());
    }

    #[tokio::test]
    async fn test_tool_that_writes_nothing_falls_back_to_raw() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "exit 0");
        let provisioner = DiskProvisioner::new(dir.path().join("images"), tool, Launcher::default());

        let path = provisioner.ensure_disk("m1", 1).await.expect("disk");

        assert_eq!(path, dir.path().join("images/m1.img"));
    }

    #[tokio::test]
    async fn test_missing_tool_falls_back_to_raw() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = DiskProvisioner::new(
            dir.path().join("images"),
            dir.path().join("no-such-tool"),
            Launcher::default(),
        );

        let path = provisioner.ensure_disk("m1", 1).await.expect("disk");

        assert_eq!(path, dir.path().join("images/m1.img"));
    }

    #[tokio::test]
    async fn test_existing_image_is_returned_untouched() {
        // Arrange: a tool that would fail loudly if it were run
        let dir = tempfile::tempdir().unwrap();
        let images = dir.path().join("images");
        std::fs::create_dir_all(&images).unwrap();
        std::fs::write(images.join("m1.qcow2"), b"existing").unwrap();
        let tool = fake_tool(dir.path(), "exit 99");
        let provisioner = DiskProvisioner::new(&images, tool, Launcher::default());

        // Act
        let path = provisioner.ensure_disk("m1", 4096).await.expect("disk");

        // Assert
        assert_eq!(path, images.join("m1.qcow2"));
        assert_eq!(std::fs::read(&path).unwrap(), b"existing");
    }

    #[tokio::test]
    async fn test_raw_image_from_earlier_fallback_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let tool = fake_tool(dir.path(), "exit 1");
        let provisioner = DiskProvisioner::new(dir.path().join("images"), tool, Launcher::default());
        let first = provisioner.ensure_disk("m1", 1).await.expect("first");

        let second = provisioner.ensure_disk("m1", 8).await.expect("second");

        assert_eq!(first, second);
        assert_eq!(std::fs::metadata(&second).unwrap().len(), MIB);
    }
}
