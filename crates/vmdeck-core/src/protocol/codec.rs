//! Byte-level encoding of client messages and parsing of server payloads.
//!
//! The functions here work on complete byte slices and never perform I/O.
//! The viewer reads exactly the number of bytes a message needs (the
//! `*_len` helpers tell it how many) and hands the buffer to a parser.
//!
//! Pixel layout after negotiation (see [`PixelFormat::session_default`]):
//! ```text
//! [blue:1][green:1][red:1][padding:1]
//! ```

use thiserror::Error;

use crate::domain::framebuffer::{argb, CursorShape};
use crate::protocol::messages::{
    ClientMessage, PixelFormat, ProtocolVersion, RectangleHeader, ServerInitHeader,
    BYTES_PER_PIXEL, PIXEL_FORMAT_LEN, RECTANGLE_HEADER_LEN, SERVER_INIT_LEN, VERSION_LEN,
};

/// Errors raised while parsing server bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the structure it should hold.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The version banner is not of the form `RFB xxx.yyy\n`.
    #[error("malformed version banner: {0:?}")]
    InvalidVersion(String),

    /// The server speaks a protocol version this client cannot follow.
    #[error("unsupported protocol version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    /// A length-prefixed string is longer than this client accepts.
    #[error("{field} length {len} exceeds the {limit}-byte limit")]
    LengthLimit {
        field: &'static str,
        len: u32,
        limit: u32,
    },
}

/// Upper bound for the desktop name and server reason strings.
pub const MAX_STRING_LEN: u32 = 64 * 1024;

/// Checks a length prefix against [`MAX_STRING_LEN`].
pub fn check_string_len(field: &'static str, len: u32) -> Result<usize, ProtocolError> {
    if len > MAX_STRING_LEN {
        return Err(ProtocolError::LengthLimit {
            field,
            len,
            limit: MAX_STRING_LEN,
        });
    }
    Ok(len as usize)
}

fn ensure_len(bytes: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if bytes.len() < needed {
        return Err(ProtocolError::InsufficientData {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

// ── Client messages ───────────────────────────────────────────────────────────

/// Encodes a [`ClientMessage`] into its wire form.
///
/// # Examples
///
/// ```rust
/// use vmdeck_core::protocol::{encode_client_message, ClientMessage};
///
/// let bytes = encode_client_message(&ClientMessage::KeyEvent { down: true, keysym: 0x61 });
/// assert_eq!(bytes, vec![4, 1, 0, 0, 0, 0, 0, 0x61]);
/// ```
pub fn encode_client_message(msg: &ClientMessage) -> Vec<u8> {
    let tag = msg.message_type() as u8;
    match msg {
        ClientMessage::SetPixelFormat(format) => {
            let mut buf = Vec::with_capacity(4 + PIXEL_FORMAT_LEN);
            buf.extend_from_slice(&[tag, 0, 0, 0]);
            buf.extend_from_slice(&format.to_bytes());
            buf
        }
        ClientMessage::SetEncodings(encodings) => {
            let mut buf = Vec::with_capacity(4 + encodings.len() * 4);
            buf.extend_from_slice(&[tag, 0]);
            buf.extend_from_slice(&(encodings.len() as u16).to_be_bytes());
            for encoding in encodings {
                buf.extend_from_slice(&encoding.id().to_be_bytes());
            }
            buf
        }
        ClientMessage::FramebufferUpdateRequest {
            incremental,
            x,
            y,
            width,
            height,
        } => {
            let mut buf = Vec::with_capacity(10);
            buf.push(tag);
            buf.push(*incremental as u8);
            buf.extend_from_slice(&x.to_be_bytes());
            buf.extend_from_slice(&y.to_be_bytes());
            buf.extend_from_slice(&width.to_be_bytes());
            buf.extend_from_slice(&height.to_be_bytes());
            buf
        }
        ClientMessage::KeyEvent { down, keysym } => {
            let mut buf = Vec::with_capacity(8);
            buf.extend_from_slice(&[tag, *down as u8, 0, 0]);
            buf.extend_from_slice(&keysym.to_be_bytes());
            buf
        }
        ClientMessage::PointerEvent { button_mask, x, y } => {
            let mut buf = Vec::with_capacity(6);
            buf.extend_from_slice(&[tag, *button_mask]);
            buf.extend_from_slice(&x.to_be_bytes());
            buf.extend_from_slice(&y.to_be_bytes());
            buf
        }
    }
}

// ── Handshake ─────────────────────────────────────────────────────────────────

/// Parses a 12-byte `RFB xxx.yyy\n` version banner.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidVersion`] if the banner is malformed.
pub fn parse_version(bytes: &[u8]) -> Result<ProtocolVersion, ProtocolError> {
    ensure_len(bytes, VERSION_LEN)?;
    let banner = &bytes[..VERSION_LEN];
    let invalid = || ProtocolError::InvalidVersion(String::from_utf8_lossy(banner).into_owned());

    if &banner[..4] != b"RFB " || banner[7] != b'.' || banner[11] != b'\n' {
        return Err(invalid());
    }
    let digits = |range: std::ops::Range<usize>| -> Result<u16, ProtocolError> {
        std::str::from_utf8(&banner[range])
            .ok()
            .filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|s| s.parse().ok())
            .ok_or_else(invalid)
    };
    Ok(ProtocolVersion {
        major: digits(4..7)?,
        minor: digits(8..11)?,
    })
}

/// Checks that the session can proceed with the server's version.
///
/// The client always announces 3.8, so the session runs at the lower of the
/// two versions.  3.7 and later share the security-type list this client
/// relies on; 3.3 sends a single server-chosen type instead and is refused.
///
/// # Errors
///
/// Returns [`ProtocolError::UnsupportedVersion`] for anything before 3.7.
pub fn check_server_version(version: ProtocolVersion) -> Result<ProtocolVersion, ProtocolError> {
    if version.major < 3 || (version.major == 3 && version.minor < 7) {
        return Err(ProtocolError::UnsupportedVersion {
            major: version.major,
            minor: version.minor,
        });
    }
    // Servers newer than 3.8 fall back to the client's version.
    Ok(if version.major > 3 || version.minor > 8 {
        ProtocolVersion { major: 3, minor: 8 }
    } else {
        version
    })
}

/// Parses the fixed 24-byte part of ServerInit.
pub fn parse_server_init(bytes: &[u8]) -> Result<ServerInitHeader, ProtocolError> {
    ensure_len(bytes, SERVER_INIT_LEN)?;
    let mut format = [0u8; PIXEL_FORMAT_LEN];
    format.copy_from_slice(&bytes[4..4 + PIXEL_FORMAT_LEN]);
    Ok(ServerInitHeader {
        width: u16::from_be_bytes([bytes[0], bytes[1]]),
        height: u16::from_be_bytes([bytes[2], bytes[3]]),
        pixel_format: PixelFormat::from_bytes(&format),
        name_len: u32::from_be_bytes([bytes[20], bytes[21], bytes[22], bytes[23]]),
    })
}

// ── Framebuffer updates ───────────────────────────────────────────────────────

/// Parses a 12-byte rectangle header.
pub fn parse_rectangle_header(bytes: &[u8]) -> Result<RectangleHeader, ProtocolError> {
    ensure_len(bytes, RECTANGLE_HEADER_LEN)?;
    let u16_at = |i: usize| u16::from_be_bytes([bytes[i], bytes[i + 1]]);
    Ok(RectangleHeader {
        x: u16_at(0),
        y: u16_at(2),
        width: u16_at(4),
        height: u16_at(6),
        encoding: i32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
    })
}

/// Payload length of a raw rectangle.
pub fn raw_len(width: u16, height: u16) -> usize {
    width as usize * height as usize * BYTES_PER_PIXEL
}

/// Decodes raw pixels (B, G, R, padding) into `0x00RRGGBB` words.
pub fn decode_raw_pixels(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(BYTES_PER_PIXEL)
        .map(|px| ((px[2] as u32) << 16) | ((px[1] as u32) << 8) | px[0] as u32)
        .collect()
}

/// Bytes per row of a 1-bit cursor mask or bitmap.
pub fn mask_row_bytes(width: u16) -> usize {
    (width as usize + 7) / 8
}

/// Payload length of a rich-cursor rectangle: pixels followed by the mask.
pub fn rich_cursor_len(width: u16, height: u16) -> usize {
    raw_len(width, height) + mask_row_bytes(width) * height as usize
}

/// Payload length of an X-cursor rectangle: two RGB colours, bitmap, mask.
///
/// A zero-sized cursor carries no payload at all.
pub fn x_cursor_len(width: u16, height: u16) -> usize {
    if width == 0 || height == 0 {
        return 0;
    }
    6 + 2 * mask_row_bytes(width) * height as usize
}

/// Payload length of a CopyRect rectangle: source x and y.
pub const COPY_RECT_LEN: usize = 4;

/// Parses a CopyRect payload into the source position.
pub fn parse_copy_rect(bytes: &[u8]) -> Result<(u16, u16), ProtocolError> {
    ensure_len(bytes, COPY_RECT_LEN)?;
    Ok((
        u16::from_be_bytes([bytes[0], bytes[1]]),
        u16::from_be_bytes([bytes[2], bytes[3]]),
    ))
}

fn mask_bit(mask: &[u8], row_bytes: usize, x: usize, y: usize) -> bool {
    mask[y * row_bytes + x / 8] & (0x80 >> (x % 8)) != 0
}

/// Decodes a rich-cursor rectangle.  Pixels whose mask bit is clear are
/// fully transparent; the rest are opaque.
pub fn decode_rich_cursor(
    header: &RectangleHeader,
    bytes: &[u8],
) -> Result<CursorShape, ProtocolError> {
    let (w, h) = (header.width, header.height);
    ensure_len(bytes, rich_cursor_len(w, h))?;

    let pixel_bytes = raw_len(w, h);
    let colors = decode_raw_pixels(&bytes[..pixel_bytes]);
    let mask = &bytes[pixel_bytes..];
    let row_bytes = mask_row_bytes(w);

    let mut pixels = Vec::with_capacity(header.pixel_count());
    for y in 0..h as usize {
        for x in 0..w as usize {
            let color = colors[y * w as usize + x];
            pixels.push(if mask_bit(mask, row_bytes, x, y) {
                0xFF00_0000 | color
            } else {
                0
            });
        }
    }
    Ok(cursor_shape(header, pixels))
}

/// Decodes an X-cursor rectangle: where the mask bit is set the bitmap bit
/// picks the foreground (1) or background (0) colour, elsewhere the pixel is
/// transparent.
pub fn decode_x_cursor(
    header: &RectangleHeader,
    bytes: &[u8],
) -> Result<CursorShape, ProtocolError> {
    let (w, h) = (header.width, header.height);
    let needed = x_cursor_len(w, h);
    ensure_len(bytes, needed)?;
    if needed == 0 {
        return Ok(cursor_shape(header, Vec::new()));
    }

    let fore = argb(0xFF, bytes[0], bytes[1], bytes[2]);
    let back = argb(0xFF, bytes[3], bytes[4], bytes[5]);
    let row_bytes = mask_row_bytes(w);
    let plane = row_bytes * h as usize;
    let bitmap = &bytes[6..6 + plane];
    let mask = &bytes[6 + plane..6 + 2 * plane];

    let mut pixels = Vec::with_capacity(header.pixel_count());
    for y in 0..h as usize {
        for x in 0..w as usize {
            pixels.push(if !mask_bit(mask, row_bytes, x, y) {
                0
            } else if mask_bit(bitmap, row_bytes, x, y) {
                fore
            } else {
                back
            });
        }
    }
    Ok(cursor_shape(header, pixels))
}

fn cursor_shape(header: &RectangleHeader, pixels: Vec<u32>) -> CursorShape {
    CursorShape {
        width: header.width,
        height: header.height,
        hotspot_x: header.x,
        hotspot_y: header.y,
        pixels,
    }
}
