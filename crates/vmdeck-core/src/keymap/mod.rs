//! Key translation into the RFB keysym space.
//!
//! Host input arrives either as physical keys ([`HostKey`], USB HID usage
//! identifiers plus shift state) or as typed characters.  Both are turned
//! into X11 keysyms here, at the protocol boundary.

pub mod host;
pub mod keysym;

pub use host::HostKey;
pub use keysym::char_to_keysym;
