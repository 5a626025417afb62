//! Infrastructure layer for the host.
//!
//! Contains OS-facing adapters: the emulator installation, child processes,
//! and files under the storage root (machine records, disk images, cached
//! boot media).
//!
//! **Dependency rule**: this layer may depend on `vmdeck_core`, but MUST NOT
//! import from `application`.  Use cases compose these adapters, never the
//! other way around.

pub mod emulator;
pub mod process;
pub mod storage;
