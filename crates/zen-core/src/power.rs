//! Battery supervision and inactivity tracking.

use embassy_time::{Duration, Instant};
use log::{info, warn};

use crate::config::{BATTERY_CRITICAL_VOLTAGE, BATTERY_LOW_VOLTAGE, BATTERY_SMOOTHING};

/// A flag clears only once the voltage is this far above its threshold.
const BATTERY_HYSTERESIS: f32 = 0.1;

/// Voltage of a full cell, for the percentage estimate.
const BATTERY_FULL_VOLTAGE: f32 = 4.2;

/// Edge-triggered battery notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatteryEvent {
    Low,
    Critical,
}

#[derive(Debug, Clone, Default)]
pub struct BatteryMonitor {
    voltage: Option<f32>,
    low: bool,
    critical: bool,
}

impl BatteryMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smoothed voltage, `None` before the first reading.
    pub fn voltage(&self) -> Option<f32> {
        self.voltage
    }

    pub fn is_low(&self) -> bool {
        self.low
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn percent(&self) -> Option<u8> {
        self.voltage.map(|v| {
            let pct = (v - BATTERY_CRITICAL_VOLTAGE)
                / (BATTERY_FULL_VOLTAGE - BATTERY_CRITICAL_VOLTAGE)
                * 100.0;
            pct.clamp(0.0, 100.0) as u8
        })
    }

    /// Feed a raw voltage reading. Returns an event when a threshold is
    /// crossed downwards; each event fires once until the voltage recovers.
    pub fn update(&mut self, sample: f32) -> Option<BatteryEvent> {
        if !sample.is_finite() || sample <= 0.0 {
            warn!("Ignoring invalid battery reading {}", sample);
            return None;
        }

        let v = match self.voltage {
            None => sample,
            Some(prev) => prev * BATTERY_SMOOTHING + sample * (1.0 - BATTERY_SMOOTHING),
        };
        self.voltage = Some(v);

        let mut event = None;

        if v <= BATTERY_LOW_VOLTAGE && !self.low {
            self.low = true;
            warn!("Battery low: {:.2} V", v);
            event = Some(BatteryEvent::Low);
        } else if v > BATTERY_LOW_VOLTAGE + BATTERY_HYSTERESIS && self.low {
            self.low = false;
            info!("Battery recovered: {:.2} V", v);
        }

        if v <= BATTERY_CRITICAL_VOLTAGE && !self.critical {
            self.critical = true;
            warn!("Battery critical: {:.2} V", v);
            event = Some(BatteryEvent::Critical);
        } else if v > BATTERY_CRITICAL_VOLTAGE + BATTERY_HYSTERESIS {
            self.critical = false;
        }

        event
    }
}

/// Time since the last user input.
#[derive(Debug, Clone, Copy)]
pub struct ActivityTracker {
    last_activity: Instant,
}

impl ActivityTracker {
    pub fn new(now: Instant) -> Self {
        Self { last_activity: now }
    }

    pub fn record(&mut self, now: Instant) {
        self.last_activity = now;
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }
}
