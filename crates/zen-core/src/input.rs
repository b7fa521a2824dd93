//! Semantic button input.
//!
//! Debouncing and gesture recognition happen on the platform side; the core
//! only sees finished gestures.

use embassy_time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonGesture {
    Click,
    DoubleClick,
    LongPress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonEvent {
    pub gesture: ButtonGesture,
    pub pressed_at: Instant,
    pub released_at: Instant,
}

impl ButtonEvent {
    pub fn new(gesture: ButtonGesture, pressed_at: Instant, released_at: Instant) -> Self {
        Self {
            gesture,
            pressed_at,
            released_at,
        }
    }

    /// A gesture whose press and release both happen at `at`.
    pub fn instant(gesture: ButtonGesture, at: Instant) -> Self {
        Self::new(gesture, at, at)
    }

    pub fn duration(&self) -> Duration {
        self.released_at.saturating_duration_since(self.pressed_at)
    }
}
