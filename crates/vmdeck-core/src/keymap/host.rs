//! Host key identifiers and their keysym translation.
//!
//! Host keys are identified by their USB HID Usage ID (page 0x07,
//! Keyboard/Keypad).  HID codes name physical key positions, so the
//! translation to a keysym needs the shift state as well: `KeyA` produces
//! `a` (0x61) unshifted and `A` (0x41) shifted, `Digit1` produces `1` or `!`.
//!
//! The table assumes a US layout, which is what the emulator's VNC server
//! assumes when it converts keysyms back into guest scancodes.
//!
//! Reference: USB HID Usage Tables 1.3, Section 10.

use serde::{Deserialize, Serialize};

use super::keysym;

/// USB HID Usage ID for keyboard keys (page 0x07).
///
/// [`HostKey::Unknown`] stands for any key without a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum HostKey {
    // Letters (HID 0x04–0x1D)
    KeyA = 0x04,
    KeyB = 0x05,
    KeyC = 0x06,
    KeyD = 0x07,
    KeyE = 0x08,
    KeyF = 0x09,
    KeyG = 0x0A,
    KeyH = 0x0B,
    KeyI = 0x0C,
    KeyJ = 0x0D,
    KeyK = 0x0E,
    KeyL = 0x0F,
    KeyM = 0x10,
    KeyN = 0x11,
    KeyO = 0x12,
    KeyP = 0x13,
    KeyQ = 0x14,
    KeyR = 0x15,
    KeyS = 0x16,
    KeyT = 0x17,
    KeyU = 0x18,
    KeyV = 0x19,
    KeyW = 0x1A,
    KeyX = 0x1B,
    KeyY = 0x1C,
    KeyZ = 0x1D,

    // Digits (HID 0x1E–0x27)
    Digit1 = 0x1E,
    Digit2 = 0x1F,
    Digit3 = 0x20,
    Digit4 = 0x21,
    Digit5 = 0x22,
    Digit6 = 0x23,
    Digit7 = 0x24,
    Digit8 = 0x25,
    Digit9 = 0x26,
    Digit0 = 0x27,

    // Control and punctuation (HID 0x28–0x38)
    Enter = 0x28,
    Escape = 0x29,
    Backspace = 0x2A,
    Tab = 0x2B,
    Space = 0x2C,
    Minus = 0x2D,
    Equal = 0x2E,
    BracketLeft = 0x2F,
    BracketRight = 0x30,
    Backslash = 0x31,
    Semicolon = 0x33,
    Quote = 0x34,
    Backquote = 0x35,
    Comma = 0x36,
    Period = 0x37,
    Slash = 0x38,

    CapsLock = 0x39,

    // Function keys (HID 0x3A–0x45)
    F1 = 0x3A,
    F2 = 0x3B,
    F3 = 0x3C,
    F4 = 0x3D,
    F5 = 0x3E,
    F6 = 0x3F,
    F7 = 0x40,
    F8 = 0x41,
    F9 = 0x42,
    F10 = 0x43,
    F11 = 0x44,
    F12 = 0x45,

    // Navigation cluster (HID 0x46–0x52)
    PrintScreen = 0x46,
    ScrollLock = 0x47,
    Pause = 0x48,
    Insert = 0x49,
    Home = 0x4A,
    PageUp = 0x4B,
    Delete = 0x4C,
    End = 0x4D,
    PageDown = 0x4E,
    ArrowRight = 0x4F,
    ArrowLeft = 0x50,
    ArrowDown = 0x51,
    ArrowUp = 0x52,

    // Numpad (HID 0x53–0x63)
    NumLock = 0x53,
    NumpadDivide = 0x54,
    NumpadMultiply = 0x55,
    NumpadSubtract = 0x56,
    NumpadAdd = 0x57,
    NumpadEnter = 0x58,
    Numpad1 = 0x59,
    Numpad2 = 0x5A,
    Numpad3 = 0x5B,
    Numpad4 = 0x5C,
    Numpad5 = 0x5D,
    Numpad6 = 0x5E,
    Numpad7 = 0x5F,
    Numpad8 = 0x60,
    Numpad9 = 0x61,
    Numpad0 = 0x62,
    NumpadDecimal = 0x63,

    ContextMenu = 0x65,

    // Modifiers (HID 0xE0–0xE7)
    ControlLeft = 0xE0,
    ShiftLeft = 0xE1,
    AltLeft = 0xE2,
    MetaLeft = 0xE3,
    ControlRight = 0xE4,
    ShiftRight = 0xE5,
    AltRight = 0xE6,
    MetaRight = 0xE7,

    /// Sentinel for keys with no HID mapping.
    Unknown = 0x0000,
}

impl HostKey {
    /// Every mapped key, in HID order.
    pub const ALL: &'static [HostKey] = &[
        HostKey::KeyA,
        HostKey::KeyB,
        HostKey::KeyC,
        HostKey::KeyD,
        HostKey::KeyE,
        HostKey::KeyF,
        HostKey::KeyG,
        HostKey::KeyH,
        HostKey::KeyI,
        HostKey::KeyJ,
        HostKey::KeyK,
        HostKey::KeyL,
        HostKey::KeyM,
        HostKey::KeyN,
        HostKey::KeyO,
        HostKey::KeyP,
        HostKey::KeyQ,
        HostKey::KeyR,
        HostKey::KeyS,
        HostKey::KeyT,
        HostKey::KeyU,
        HostKey::KeyV,
        HostKey::KeyW,
        HostKey::KeyX,
        HostKey::KeyY,
        HostKey::KeyZ,
        HostKey::Digit1,
        HostKey::Digit2,
        HostKey::Digit3,
        HostKey::Digit4,
        HostKey::Digit5,
        HostKey::Digit6,
        HostKey::Digit7,
        HostKey::Digit8,
        HostKey::Digit9,
        HostKey::Digit0,
        HostKey::Enter,
        HostKey::Escape,
        HostKey::Backspace,
        HostKey::Tab,
        HostKey::Space,
        HostKey::Minus,
        HostKey::Equal,
        HostKey::BracketLeft,
        HostKey::BracketRight,
        HostKey::Backslash,
        HostKey::Semicolon,
        HostKey::Quote,
        HostKey::Backquote,
        HostKey::Comma,
        HostKey::Period,
        HostKey::Slash,
        HostKey::CapsLock,
        HostKey::F1,
        HostKey::F2,
        HostKey::F3,
        HostKey::F4,
        HostKey::F5,
        HostKey::F6,
        HostKey::F7,
        HostKey::F8,
        HostKey::F9,
        HostKey::F10,
        HostKey::F11,
        HostKey::F12,
        HostKey::PrintScreen,
        HostKey::ScrollLock,
        HostKey::Pause,
        HostKey::Insert,
        HostKey::Home,
        HostKey::PageUp,
        HostKey::Delete,
        HostKey::End,
        HostKey::PageDown,
        HostKey::ArrowRight,
        HostKey::ArrowLeft,
        HostKey::ArrowDown,
        HostKey::ArrowUp,
        HostKey::NumLock,
        HostKey::NumpadDivide,
        HostKey::NumpadMultiply,
        HostKey::NumpadSubtract,
        HostKey::NumpadAdd,
        HostKey::NumpadEnter,
        HostKey::Numpad1,
        HostKey::Numpad2,
        HostKey::Numpad3,
        HostKey::Numpad4,
        HostKey::Numpad5,
        HostKey::Numpad6,
        HostKey::Numpad7,
        HostKey::Numpad8,
        HostKey::Numpad9,
        HostKey::Numpad0,
        HostKey::NumpadDecimal,
        HostKey::ContextMenu,
        HostKey::ControlLeft,
        HostKey::ShiftLeft,
        HostKey::AltLeft,
        HostKey::MetaLeft,
        HostKey::ControlRight,
        HostKey::ShiftRight,
        HostKey::AltRight,
        HostKey::MetaRight,
    ];

    /// Converts a raw HID Usage ID to a [`HostKey`].
    ///
    /// Returns [`HostKey::Unknown`] for unassigned values.
    pub fn from_usage(usage: u16) -> Self {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.usage() == usage)
            .unwrap_or(HostKey::Unknown)
    }

    /// Returns the raw HID Usage ID.
    pub fn usage(self) -> u16 {
        self as u16
    }

    /// Returns `true` for Ctrl, Shift, Alt and Meta on either side.
    pub fn is_modifier(self) -> bool {
        matches!(
            self,
            HostKey::ControlLeft
                | HostKey::ControlRight
                | HostKey::ShiftLeft
                | HostKey::ShiftRight
                | HostKey::AltLeft
                | HostKey::AltRight
                | HostKey::MetaLeft
                | HostKey::MetaRight
        )
    }

    /// Returns `true` for either Shift key.
    pub fn is_shift(self) -> bool {
        matches!(self, HostKey::ShiftLeft | HostKey::ShiftRight)
    }

    /// Characters produced by this key without and with Shift, for keys that
    /// type a glyph.
    fn glyphs(self) -> Option<(char, char)> {
        let pair = match self {
            HostKey::Digit1 => ('1', '!'),
            HostKey::Digit2 => ('2', '@'),
            HostKey::Digit3 => ('3', '#'),
            HostKey::Digit4 => ('4', '$'),
            HostKey::Digit5 => ('5', '%'),
            HostKey::Digit6 => ('6', '^'),
            HostKey::Digit7 => ('7', '&'),
            HostKey::Digit8 => ('8', '*'),
            HostKey::Digit9 => ('9', '('),
            HostKey::Digit0 => ('0', ')'),
            HostKey::Space => (' ', ' '),
            HostKey::Minus => ('-', '_'),
            HostKey::Equal => ('=', '+'),
            HostKey::BracketLeft => ('[', '{'),
            HostKey::BracketRight => (']', '}'),
            HostKey::Backslash => ('\\', '|'),
            HostKey::Semicolon => (';', ':'),
            HostKey::Quote => ('\'', '"'),
            HostKey::Backquote => ('`', '~'),
            HostKey::Comma => (',', '<'),
            HostKey::Period => ('.', '>'),
            HostKey::Slash => ('/', '?'),
            key => {
                let usage = key.usage();
                if (HostKey::KeyA.usage()..=HostKey::KeyZ.usage()).contains(&usage) {
                    let offset = (usage - HostKey::KeyA.usage()) as u8;
                    ((b'a' + offset) as char, (b'A' + offset) as char)
                } else {
                    return None;
                }
            }
        };
        Some(pair)
    }

    /// Translates the key to the keysym sent in an RFB `KeyEvent`.
    ///
    /// Total over all keys: [`HostKey::Unknown`] yields
    /// [`keysym::VOID_SYMBOL`].
    pub fn to_keysym(self, shift: bool) -> u32 {
        if let Some((plain, shifted)) = self.glyphs() {
            let glyph = if shift { shifted } else { plain };
            return glyph as u32;
        }
        match self {
            HostKey::Enter => keysym::RETURN,
            HostKey::Escape => keysym::ESCAPE,
            HostKey::Backspace => keysym::BACKSPACE,
            HostKey::Tab => keysym::TAB,
            HostKey::CapsLock => keysym::CAPS_LOCK,
            HostKey::PrintScreen => keysym::PRINT,
            HostKey::ScrollLock => keysym::SCROLL_LOCK,
            HostKey::Pause => keysym::PAUSE,
            HostKey::Insert => keysym::INSERT,
            HostKey::Home => keysym::HOME,
            HostKey::PageUp => keysym::PAGE_UP,
            HostKey::Delete => keysym::DELETE,
            HostKey::End => keysym::END,
            HostKey::PageDown => keysym::PAGE_DOWN,
            HostKey::ArrowRight => keysym::RIGHT,
            HostKey::ArrowLeft => keysym::LEFT,
            HostKey::ArrowDown => keysym::DOWN,
            HostKey::ArrowUp => keysym::UP,
            HostKey::NumLock => keysym::NUM_LOCK,
            HostKey::NumpadDivide => keysym::KP_DIVIDE,
            HostKey::NumpadMultiply => keysym::KP_MULTIPLY,
            HostKey::NumpadSubtract => keysym::KP_SUBTRACT,
            HostKey::NumpadAdd => keysym::KP_ADD,
            HostKey::NumpadEnter => keysym::KP_ENTER,
            HostKey::Numpad0 => keysym::KP_0,
            HostKey::Numpad1 => keysym::KP_0 + 1,
            HostKey::Numpad2 => keysym::KP_0 + 2,
            HostKey::Numpad3 => keysym::KP_0 + 3,
            HostKey::Numpad4 => keysym::KP_0 + 4,
            HostKey::Numpad5 => keysym::KP_0 + 5,
            HostKey::Numpad6 => keysym::KP_0 + 6,
            HostKey::Numpad7 => keysym::KP_0 + 7,
            HostKey::Numpad8 => keysym::KP_0 + 8,
            HostKey::Numpad9 => keysym::KP_0 + 9,
            HostKey::NumpadDecimal => keysym::KP_DECIMAL,
            HostKey::ContextMenu => keysym::MENU,
            HostKey::F1 => keysym::F1,
            HostKey::F2 => keysym::F1 + 1,
            HostKey::F3 => keysym::F1 + 2,
            HostKey::F4 => keysym::F1 + 3,
            HostKey::F5 => keysym::F1 + 4,
            HostKey::F6 => keysym::F1 + 5,
            HostKey::F7 => keysym::F1 + 6,
            HostKey::F8 => keysym::F1 + 7,
            HostKey::F9 => keysym::F1 + 8,
            HostKey::F10 => keysym::F1 + 9,
            HostKey::F11 => keysym::F1 + 10,
            HostKey::F12 => keysym::F1 + 11,
            HostKey::ControlLeft => keysym::CONTROL_L,
            HostKey::ControlRight => keysym::CONTROL_R,
            HostKey::ShiftLeft => keysym::SHIFT_L,
            HostKey::ShiftRight => keysym::SHIFT_R,
            HostKey::AltLeft => keysym::ALT_L,
            HostKey::AltRight => keysym::ALT_R,
            HostKey::MetaLeft => keysym::SUPER_L,
            HostKey::MetaRight => keysym::SUPER_R,
            _ => keysym::VOID_SYMBOL,
        }
    }
}
