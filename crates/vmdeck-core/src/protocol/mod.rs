//! RFB wire protocol: message definitions and the byte codec.

pub mod codec;
pub mod messages;

pub use codec::{encode_client_message, ProtocolError};
pub use messages::*;
