//! Debounced panel push buttons.
//!
//! ## Hardware
//!
//! Buttons land on the opto-isolated DI bank and are sampled as part of the
//! input bitmap once per loop.  Two contact styles are in use:
//!
//! | Button | Contact          | Pressed when      |
//! |--------|------------------|-------------------|
//! | Start  | normally open    | DI bit goes high  |
//! | Stop   | normally closed  | DI bit goes low   |
//!
//! A level change is accepted only once the previous accepted change is
//! older than the debounce window; bounces inside the window are ignored
//! and the next sample re-evaluates the settled level.

use crate::config::BUTTON_DEBOUNCE_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Contact {
    NormallyOpen,
    NormallyClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    Pressed,
    Released,
}

pub struct PanelButton {
    bit: u8,
    contact: Contact,
    pressed: bool,
    last_change_ms: u64,
    primed: bool,
}

impl PanelButton {
    pub fn new(bit: u8, contact: Contact) -> Self {
        Self { bit, contact, pressed: false, last_change_ms: 0, primed: false }
    }

    pub fn is_pressed(&self) -> bool {
        self.pressed
    }

    /// Feed the current DI bitmap.  The first sample only establishes the
    /// resting level, so a button held through boot does not fire.
    pub fn sample(&mut self, inputs: u8, now_ms: u64) -> Option<ButtonEvent> {
        let high = inputs & (1 << self.bit) != 0;
        let pressed = match self.contact {
            Contact::NormallyOpen => high,
            Contact::NormallyClosed => !high,
        };

        if !self.primed {
            self.primed = true;
            self.pressed = pressed;
            self.last_change_ms = now_ms;
            return None;
        }
        if pressed == self.pressed || now_ms.saturating_sub(self.last_change_ms) <= BUTTON_DEBOUNCE_MS {
            return None;
        }
        self.pressed = pressed;
        self.last_change_ms = now_ms;
        Some(if pressed { ButtonEvent::Pressed } else { ButtonEvent::Released })
    }
}
