//! Application layer use cases for the viewer.
//!
//! - **`forward_input`** – Translates host keyboard, text and pointer input
//!   into keysyms and pointer events and hands them to an [`InputSink`]
//!   (implemented by the RFB session).  Holds the sticky Ctrl/Alt latches
//!   used by on-screen keyboards.
//!
//! [`InputSink`]: forward_input::InputSink

pub mod forward_input;
