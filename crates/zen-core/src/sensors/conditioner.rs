use embassy_time::Instant;

use super::{CalibrationProfile, RawSample};
use crate::config::FILTER_ALPHA;

/// Calibrated and low-pass filtered reading. Recomputed every tick and never
/// persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConditionedSample {
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
    pub timestamp: Instant,
}

impl ConditionedSample {
    pub const fn new(accel: [f32; 3], gyro: [f32; 3], timestamp: Instant) -> Self {
        Self {
            accel,
            gyro,
            timestamp,
        }
    }
}

/// Applies calibration offsets and a single-pole IIR filter per axis:
/// `y[n] = α·x[n] + (1 − α)·y[n−1]`.
///
/// The filter memory belongs to this conditioner alone and is carried across
/// calls until [`SignalConditioner::reset`].
#[derive(Debug, Clone)]
pub struct SignalConditioner {
    alpha: f32,
    accel_state: [f32; 3],
    gyro_state: [f32; 3],
}

impl Default for SignalConditioner {
    fn default() -> Self {
        Self::new(FILTER_ALPHA)
    }
}

impl SignalConditioner {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            accel_state: [0.0; 3],
            gyro_state: [0.0; 3],
        }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Clear the filter memory.
    pub fn reset(&mut self) {
        self.accel_state = [0.0; 3];
        self.gyro_state = [0.0; 3];
    }

    pub fn condition(
        &mut self,
        raw: &RawSample,
        profile: &CalibrationProfile,
    ) -> ConditionedSample {
        let (accel, gyro) = profile.apply(raw.accel, raw.gyro);

        for axis in 0..3 {
            self.accel_state[axis] =
                self.alpha * accel[axis] + (1.0 - self.alpha) * self.accel_state[axis];
            self.gyro_state[axis] =
                self.alpha * gyro[axis] + (1.0 - self.alpha) * self.gyro_state[axis];
        }

        ConditionedSample::new(self.accel_state, self.gyro_state, raw.timestamp)
    }
}
