//! InputForwarder: turns host input into RFB key and pointer events.
//!
//! This use case sits at the application layer and delegates to an
//! [`InputSink`] trait object for the actual transmission.  The RFB session
//! in the infrastructure layer is the production sink.
//!
//! Three input sources are handled:
//!
//! - Physical keys, identified by [`HostKey`] (USB HID usage).  The
//!   forwarder tracks the Shift keys itself so a key translates to the
//!   shifted or unshifted keysym.
//! - Text, typed one character at a time as down/up pairs.
//! - Pointer movement and buttons, passed through unchanged.
//!
//! Sticky modifiers serve touch keyboards that cannot hold two keys at once:
//! latching Ctrl or Alt sends its key-down immediately and the matching
//! key-up after the next non-modifier key is released.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;
use vmdeck_core::keymap::{char_to_keysym, keysym, HostKey};

/// Destination for translated input events.
#[async_trait]
pub trait InputSink: Send + Sync {
    /// Sends a key press (`down = true`) or release for `keysym`.
    async fn key(&self, keysym: u32, down: bool);

    /// Moves the pointer to `(x, y)` with the given button mask
    /// (bit 0 = left, bit 1 = middle, bit 2 = right, bits 3/4 = wheel).
    async fn pointer(&self, x: u16, y: u16, button_mask: u8);
}

/// Modifiers that can be latched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StickyModifier {
    Ctrl,
    Alt,
}

impl StickyModifier {
    fn keysym(self) -> u32 {
        match self {
            StickyModifier::Ctrl => keysym::CONTROL_L,
            StickyModifier::Alt => keysym::ALT_L,
        }
    }
}

#[derive(Debug, Default)]
struct KeyState {
    left_shift: bool,
    right_shift: bool,
    ctrl_latched: bool,
    alt_latched: bool,
}

impl KeyState {
    fn shift(&self) -> bool {
        self.left_shift || self.right_shift
    }

    fn latch(&mut self, modifier: StickyModifier) -> &mut bool {
        match modifier {
            StickyModifier::Ctrl => &mut self.ctrl_latched,
            StickyModifier::Alt => &mut self.alt_latched,
        }
    }

    /// Clears both latches and returns the keysyms that need a key-up.
    fn take_latched(&mut self) -> Vec<u32> {
        let mut released = Vec::new();
        if std::mem::take(&mut self.ctrl_latched) {
            released.push(StickyModifier::Ctrl.keysym());
        }
        if std::mem::take(&mut self.alt_latched) {
            released.push(StickyModifier::Alt.keysym());
        }
        released
    }
}

/// The Forward Input use case.
pub struct InputForwarder {
    sink: Arc<dyn InputSink>,
    state: Mutex<KeyState>,
}

impl InputForwarder {
    /// Creates a forwarder that sends to `sink`.
    pub fn new(sink: Arc<dyn InputSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(KeyState::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, KeyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Forwards a physical key press or release.
    ///
    /// Keys without a keysym are dropped.
    pub async fn key_event(&self, key: HostKey, down: bool) {
        let shift = {
            let mut state = self.state();
            match key {
                HostKey::ShiftLeft => state.left_shift = down,
                HostKey::ShiftRight => state.right_shift = down,
                _ => {}
            }
            state.shift()
        };

        let sym = key.to_keysym(shift);
        if sym == keysym::VOID_SYMBOL {
            debug!(?key, "dropping key without keysym");
            return;
        }
        self.sink.key(sym, down).await;

        if !down && !key.is_modifier() {
            self.release_latched().await;
        }
    }

    /// Types `text` as a sequence of key down/up pairs.
    ///
    /// Characters outside Latin-1 use the Unicode keysym range; control
    /// characters without a key of their own are skipped.
    pub async fn type_text(&self, text: &str) {
        for c in text.chars() {
            let sym = char_to_keysym(c);
            if sym == keysym::VOID_SYMBOL {
                debug!(codepoint = c as u32, "skipping untypeable character");
                continue;
            }
            self.sink.key(sym, true).await;
            self.sink.key(sym, false).await;
            self.release_latched().await;
        }
    }

    /// Toggles a sticky modifier.
    ///
    /// Latching sends the modifier's key-down; toggling an already latched
    /// modifier sends its key-up and clears the latch.
    pub async fn toggle_sticky(&self, modifier: StickyModifier) {
        let now_latched = {
            let mut state = self.state();
            let latch = state.latch(modifier);
            *latch = !*latch;
            *latch
        };
        self.sink.key(modifier.keysym(), now_latched).await;
    }

    /// Returns whether `modifier` is currently latched.
    pub fn is_latched(&self, modifier: StickyModifier) -> bool {
        *self.state().latch(modifier)
    }

    /// Forwards a pointer position and button mask.
    pub async fn pointer(&self, x: u16, y: u16, button_mask: u8) {
        self.sink.pointer(x, y, button_mask).await;
    }

    /// Presses and releases `button_mask` at `(x, y)`.
    pub async fn click(&self, x: u16, y: u16, button_mask: u8) {
        self.sink.pointer(x, y, button_mask).await;
        self.sink.pointer(x, y, 0).await;
    }

    async fn release_latched(&self) {
        let released = self.state().take_latched();
        for sym in released {
            self.sink.key(sym, false).await;
        }
    }
}
