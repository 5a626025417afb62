//! vmdeck-viewer library entry point.
//!
//! A VNC client for the emulator's built-in display server.
//!
//! # What does the viewer do? (for beginners)
//!
//! QEMU is started with `-display none -vnc :N`, so the guest screen is only
//! reachable over the Remote Framebuffer (RFB) protocol on TCP port
//! `5900 + N`.  The viewer:
//!
//! 1. Connects to that port and completes the RFB 3.8 handshake with the
//!    "None" security type.
//! 2. Asks the server for pixels in one fixed 32-bit format, so decoding
//!    never depends on what the server prefers.
//! 3. Runs an update loop that keeps requesting incremental updates and
//!    paints them into a framebuffer.  After each update the frame, with the
//!    cursor drawn on top, is published through a single-slot "latest frame"
//!    channel.
//! 4. Encodes keyboard and pointer input as RFB `KeyEvent` and
//!    `PointerEvent` messages.
//!
//! The input side is split in two: [`application::forward_input`] turns host
//! keys and text into keysyms, and [`infrastructure::rfb::RfbSession`] puts
//! them on the wire.

/// Application layer: input forwarding use case.
pub mod application;

/// Infrastructure layer: the RFB session over TCP.
pub mod infrastructure;

pub use application::forward_input::{InputForwarder, InputSink, StickyModifier};
pub use infrastructure::rfb::{DesktopInfo, RfbError, RfbSession, SessionConfig, SessionState};
