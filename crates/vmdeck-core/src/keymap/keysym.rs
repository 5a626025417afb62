//! X11 keysym values used as RFB key codes.
//!
//! RFB `KeyEvent` messages carry X11 keysyms (X11/keysymdef.h).  Printable
//! Latin-1 characters use their code point directly (`a` = 0x61, `A` = 0x41),
//! function and editing keys live in the 0xFF00 block, and any other Unicode
//! character is expressed as `0x0100_0000 | code_point`.

pub const BACKSPACE: u32 = 0xFF08;
pub const TAB: u32 = 0xFF09;
pub const RETURN: u32 = 0xFF0D;
pub const PAUSE: u32 = 0xFF13;
pub const SCROLL_LOCK: u32 = 0xFF14;
pub const ESCAPE: u32 = 0xFF1B;
pub const DELETE: u32 = 0xFFFF;

pub const HOME: u32 = 0xFF50;
pub const LEFT: u32 = 0xFF51;
pub const UP: u32 = 0xFF52;
pub const RIGHT: u32 = 0xFF53;
pub const DOWN: u32 = 0xFF54;
pub const PAGE_UP: u32 = 0xFF55;
pub const PAGE_DOWN: u32 = 0xFF56;
pub const END: u32 = 0xFF57;

pub const PRINT: u32 = 0xFF61;
pub const INSERT: u32 = 0xFF63;
pub const MENU: u32 = 0xFF67;
pub const NUM_LOCK: u32 = 0xFF7F;

pub const KP_ENTER: u32 = 0xFF8D;
pub const KP_MULTIPLY: u32 = 0xFFAA;
pub const KP_ADD: u32 = 0xFFAB;
pub const KP_SUBTRACT: u32 = 0xFFAD;
pub const KP_DECIMAL: u32 = 0xFFAE;
pub const KP_DIVIDE: u32 = 0xFFAF;
/// `KP_0`; `KP_1`..`KP_9` follow consecutively.
pub const KP_0: u32 = 0xFFB0;

/// `F1`; `F2`..`F12` follow consecutively.
pub const F1: u32 = 0xFFBE;

pub const SHIFT_L: u32 = 0xFFE1;
pub const SHIFT_R: u32 = 0xFFE2;
pub const CONTROL_L: u32 = 0xFFE3;
pub const CONTROL_R: u32 = 0xFFE4;
pub const CAPS_LOCK: u32 = 0xFFE5;
pub const ALT_L: u32 = 0xFFE9;
pub const ALT_R: u32 = 0xFFEA;
pub const SUPER_L: u32 = 0xFFEB;
pub const SUPER_R: u32 = 0xFFEC;

pub const SPACE: u32 = 0x0020;

/// Keysym for "no symbol".  Returned for keys with no mapping.
pub const VOID_SYMBOL: u32 = 0x00FF_FFFF;

/// Offset of the Unicode keysym range.
pub const UNICODE_OFFSET: u32 = 0x0100_0000;

/// Translates a typed character into the keysym that produces it.
///
/// Control characters with a dedicated key (newline, tab, backspace, escape)
/// map to that key.  Other control characters have no keysym and yield
/// [`VOID_SYMBOL`].
pub fn char_to_keysym(c: char) -> u32 {
    match c {
        '\n' | '\r' => RETURN,
        '\t' => TAB,
        '\u{08}' => BACKSPACE,
        '\u{1B}' => ESCAPE,
        '\u{7F}' => DELETE,
        ' '..='~' | '\u{A0}'..='\u{FF}' => c as u32,
        c if c.is_control() => VOID_SYMBOL,
        c => UNICODE_OFFSET | c as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_printable_ascii_maps_to_code_point() {
        assert_eq!(char_to_keysym('a'), 0x61);
        assert_eq!(char_to_keysym('A'), 0x41);
        assert_eq!(char_to_keysym('~'), 0x7E);
        assert_eq!(char_to_keysym(' '), SPACE);
    }

    #[test]
    fn test_latin1_maps_to_code_point() {
        assert_eq!(char_to_keysym('é'), 0xE9);
    }

    #[test]
    fn test_other_unicode_uses_unicode_range() {
        assert_eq!(char_to_keysym('€'), 0x0100_20AC);
        assert_eq!(char_to_keysym('한'), 0x0100_D55C);
    }

    #[test]
    fn test_control_characters_map_to_keys() {
        assert_eq!(char_to_keysym('\n'), RETURN);
        assert_eq!(char_to_keysym('\t'), TAB);
        assert_eq!(char_to_keysym('\u{01}'), VOID_SYMBOL);
    }
}
