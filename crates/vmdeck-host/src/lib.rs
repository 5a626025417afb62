//! vmdeck-host library entry point.
//!
//! Runs QEMU machines on the local host: provisions their disks, resolves
//! boot media, launches and supervises the emulator process, and persists
//! machine records.  The `vmdeck` binary in `main.rs` wires this together
//! with the viewer from `vmdeck_viewer`.
//!
//! # Module layout
//!
//! ```text
//! application/       lifecycle manager (use cases, in-memory process table)
//! infrastructure/
//!   emulator         installation boundary (binary present? where?)
//!   process          loader-prefixed launch, output capture, SIGTERM
//!   storage/         machine records, disk images, boot-media cache
//! config             vmdeck.toml
//! logging            tracing subscriber setup
//! ```

pub mod application;
pub mod config;
pub mod infrastructure;
pub mod logging;
