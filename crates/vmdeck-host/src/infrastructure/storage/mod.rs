//! Files under the storage root.
//!
//! ```text
//! <root>/
//!   configs/<id>.conf      machine records      (machines)
//!   images/<id>.qcow2      provisioned disks    (disk)
//!   images/<id>.img        raw fallback disks   (disk)
//!   images/iso_<hash>.iso  cached boot media    (media)
//! ```

pub mod disk;
pub mod machines;
pub mod media;

use std::path::{Path, PathBuf};

pub use disk::{DiskError, DiskProvisioner};
pub use machines::{MachineStore, StoreError};
pub use media::{ContentResolver, MediaCache, MediaError, NoContentResolver};

/// Directory holding disk images and cached media below `storage_root`.
pub fn images_dir(storage_root: &Path) -> PathBuf {
    storage_root.join("images")
}
