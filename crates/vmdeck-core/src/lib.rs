//! # vmdeck-core
//!
//! Pure building blocks for the vmdeck session core: the machine
//! description, the emulator command builder, keysym translation tables,
//! the RFB wire codec and the pixel buffer the viewer paints into.
//!
//! This crate performs no I/O.  It never opens a socket, spawns a process or
//! touches the filesystem, with one exception: the command builder checks
//! whether configured boot media exists, and even that check is injectable
//! (see [`domain::command::build_command_with_probe`]).
//!
//! # Architecture overview (for beginners)
//!
//! vmdeck runs a software-emulated machine (QEMU) and shows its screen
//! through a built-in VNC client.  The work is split across three crates:
//!
//! - **`vmdeck-core`** (this crate) holds everything that can be expressed
//!   as plain data transformations.
//!
//! - **`vmdeck-viewer`** speaks the Remote Framebuffer (RFB) protocol over
//!   TCP using the encoders and parsers defined here.
//!
//! - **`vmdeck-host`** provisions disks, launches and tracks emulator
//!   processes and provides the `vmdeck` command-line tool.
//!
//! Inside this crate:
//!
//! - **`domain`** – [`MachineConfig`], the command builder and the
//!   [`Framebuffer`] with cursor compositing.
//!
//! - **`keymap`** – USB HID host keys and characters translated into X11
//!   keysyms, the key codes RFB uses on the wire.
//!
//! - **`protocol`** – RFB message constants, client message encoders and
//!   server payload parsers.

pub mod domain;
pub mod keymap;
pub mod protocol;

pub use domain::command::{build_command, CommandLine, EmulatorLayout};
pub use domain::framebuffer::{CursorShape, Framebuffer};
pub use domain::machine::{
    Architecture, BootOrder, ConfigError, DiskFormat, MachineConfig, OsFamily, VideoAdapter,
};
pub use keymap::host::HostKey;
pub use protocol::codec::{encode_client_message, ProtocolError};
pub use protocol::messages::ClientMessage;
