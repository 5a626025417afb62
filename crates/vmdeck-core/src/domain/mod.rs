//! Domain types: the machine description, the emulator command line and the
//! decoded screen contents.

pub mod command;
pub mod framebuffer;
pub mod machine;
