//! RFB (Remote Framebuffer, RFC 6143) message types and constants.
//!
//! Only the subset a VNC viewer for a local emulator needs is modelled: the
//! no-authentication handshake, true-colour pixel format negotiation, the
//! four standard server messages and the client input messages.  All
//! multi-byte integers on the wire are big-endian.

// ── Protocol constants ────────────────────────────────────────────────────────

/// Version banner this client always sends (protocol 3.8).
pub const CLIENT_VERSION: &[u8; VERSION_LEN] = b"RFB 003.008\n";

/// Length of a version banner in bytes.
pub const VERSION_LEN: usize = 12;

/// Security type "None".
pub const SECURITY_TYPE_NONE: u8 = 1;

/// ClientInit flag asking the server to keep other viewers connected.
pub const SHARED_FLAG: u8 = 1;

/// Length of a PIXEL_FORMAT descriptor.
pub const PIXEL_FORMAT_LEN: usize = 16;

/// Fixed part of ServerInit: width, height, pixel format, name length.
pub const SERVER_INIT_LEN: usize = 2 + 2 + PIXEL_FORMAT_LEN + 4;

/// Rectangle header in a FramebufferUpdate: x, y, w, h, encoding.
pub const RECTANGLE_HEADER_LEN: usize = 12;

/// Bytes per pixel in the negotiated 32-bit format.
pub const BYTES_PER_PIXEL: usize = 4;

// ── Message type codes ────────────────────────────────────────────────────────

/// Client-to-server message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientMessageType {
    SetPixelFormat = 0,
    SetEncodings = 2,
    FramebufferUpdateRequest = 3,
    KeyEvent = 4,
    PointerEvent = 5,
}

/// Server-to-client message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerMessageType {
    FramebufferUpdate = 0,
    SetColorMapEntries = 1,
    Bell = 2,
    ServerCutText = 3,
}

impl TryFrom<u8> for ServerMessageType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ServerMessageType::FramebufferUpdate),
            1 => Ok(ServerMessageType::SetColorMapEntries),
            2 => Ok(ServerMessageType::Bell),
            3 => Ok(ServerMessageType::ServerCutText),
            other => Err(other),
        }
    }
}

// ── Encodings ─────────────────────────────────────────────────────────────────

/// Rectangle encodings and pseudo-encodings understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Encoding {
    /// Uncompressed pixels in the negotiated format.
    Raw = 0,
    /// Copy of another framebuffer region.  Decoded but never advertised.
    CopyRect = 1,
    /// The framebuffer changed size.
    DesktopSize = -223,
    /// Full-colour cursor with a transparency bitmask.
    RichCursor = -239,
    /// Two-colour cursor with bitmap and mask.
    XCursor = -240,
}

impl Encoding {
    pub fn id(self) -> i32 {
        self as i32
    }
}

impl TryFrom<i32> for Encoding {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Encoding::Raw),
            1 => Ok(Encoding::CopyRect),
            -223 => Ok(Encoding::DesktopSize),
            -239 => Ok(Encoding::RichCursor),
            -240 => Ok(Encoding::XCursor),
            other => Err(other),
        }
    }
}

/// Encodings advertised in SetEncodings, in preference order.
pub const ADVERTISED_ENCODINGS: [Encoding; 4] = [
    Encoding::Raw,
    Encoding::DesktopSize,
    Encoding::RichCursor,
    Encoding::XCursor,
];

// ── Structures ────────────────────────────────────────────────────────────────

/// A protocol version parsed from a `RFB xxx.yyy\n` banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u16,
    pub minor: u16,
}

impl ProtocolVersion {
    /// Whether the server sends a SecurityResult after security type "None".
    ///
    /// 3.8 does; 3.7 only sends one for types that authenticate.
    pub fn sends_none_security_result(self) -> bool {
        self.minor >= 8
    }

    /// Whether a failed SecurityResult is followed by a reason string.
    pub fn sends_failure_reason(self) -> bool {
        self.minor >= 8
    }
}

/// PIXEL_FORMAT descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: bool,
    pub true_color: bool,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl PixelFormat {
    /// The format this client always negotiates: 32 bits per pixel, depth
    /// 24, little-endian true colour, 8 bits per channel with red, green and
    /// blue at byte offsets 2, 1 and 0.  Pixels therefore arrive as
    /// B, G, R, padding.
    pub const fn session_default() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: false,
            true_color: true,
            red_max: 255,
            green_max: 255,
            blue_max: 255,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; PIXEL_FORMAT_LEN] {
        let mut out = [0u8; PIXEL_FORMAT_LEN];
        out[0] = self.bits_per_pixel;
        out[1] = self.depth;
        out[2] = self.big_endian as u8;
        out[3] = self.true_color as u8;
        out[4..6].copy_from_slice(&self.red_max.to_be_bytes());
        out[6..8].copy_from_slice(&self.green_max.to_be_bytes());
        out[8..10].copy_from_slice(&self.blue_max.to_be_bytes());
        out[10] = self.red_shift;
        out[11] = self.green_shift;
        out[12] = self.blue_shift;
        // out[13..16] is padding
        out
    }

    pub fn from_bytes(bytes: &[u8; PIXEL_FORMAT_LEN]) -> Self {
        Self {
            bits_per_pixel: bytes[0],
            depth: bytes[1],
            big_endian: bytes[2] != 0,
            true_color: bytes[3] != 0,
            red_max: u16::from_be_bytes([bytes[4], bytes[5]]),
            green_max: u16::from_be_bytes([bytes[6], bytes[7]]),
            blue_max: u16::from_be_bytes([bytes[8], bytes[9]]),
            red_shift: bytes[10],
            green_shift: bytes[11],
            blue_shift: bytes[12],
        }
    }
}

/// Fixed part of the ServerInit message.  The desktop name that follows has
/// `name_len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerInitHeader {
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
    pub name_len: u32,
}

/// Header of one rectangle in a FramebufferUpdate.
///
/// For the cursor pseudo-encodings `x`/`y` carry the hotspot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectangleHeader {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

impl RectangleHeader {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

/// Messages sent from the viewer to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(PixelFormat),
    SetEncodings(Vec<Encoding>),
    FramebufferUpdateRequest {
        incremental: bool,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },
    KeyEvent {
        down: bool,
        keysym: u32,
    },
    PointerEvent {
        button_mask: u8,
        x: u16,
        y: u16,
    },
}

impl ClientMessage {
    pub fn message_type(&self) -> ClientMessageType {
        match self {
            ClientMessage::SetPixelFormat(_) => ClientMessageType::SetPixelFormat,
            ClientMessage::SetEncodings(_) => ClientMessageType::SetEncodings,
            ClientMessage::FramebufferUpdateRequest { .. } => {
                ClientMessageType::FramebufferUpdateRequest
            }
            ClientMessage::KeyEvent { .. } => ClientMessageType::KeyEvent,
            ClientMessage::PointerEvent { .. } => ClientMessageType::PointerEvent,
        }
    }
}
