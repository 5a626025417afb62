//! Infrastructure layer for the viewer.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `vmdeck_core`, but MUST NOT be imported by the `application` layer.
//!
//! - **`rfb`** – The RFB client: handshake, update loop and the outbound
//!   input path, over a tokio `TcpStream`.

pub mod rfb;
