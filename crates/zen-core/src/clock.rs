//! Monotonic time source.

use core::cell::Cell;

use embassy_time::{Duration, Instant};

/// Monotonic millisecond counter supplied by the platform.
///
/// The core never reads a global clock; every component receives the
/// `Instant` of the current tick from the driver that owns this port.
pub trait ClockPort {
    fn now(&self) -> Instant;
}

/// Clock that only moves when told to. Used by tests and the simulator.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: Cell<u64>,
}

impl ManualClock {
    pub const fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Cell::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.set(self.now_ms.get() + by.as_millis());
    }

    pub fn set(&self, at: Instant) {
        // Monotonic: never move backwards.
        if at.as_millis() > self.now_ms.get() {
            self.now_ms.set(at.as_millis());
        }
    }
}

impl ClockPort for ManualClock {
    fn now(&self) -> Instant {
        Instant::from_millis(self.now_ms.get())
    }
}

impl<C: ClockPort> ClockPort for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }
}
