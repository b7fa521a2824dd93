//! Inertial sensor types and the signal-conditioning front end.
//!
//! The register protocol of the physical IMU is not part of the core. A
//! platform crate implements [`ImuSensor`] and hands already-scaled readings
//! (g and °/s) to the pipeline:
//!
//! ```text
//! ImuSensor::read -> RawSample -> SignalConditioner -> ConditionedSample
//!                         \
//!                          -> Calibrator (while calibrating)
//! ```

mod calibration;
mod conditioner;

pub use calibration::*;
pub use conditioner::*;

use embassy_time::Instant;
use thiserror_no_std::Error;

/// Errors reported by an [`ImuSensor`].
///
/// None of them are fatal: the tick loop keeps the last known score and
/// raises the `sensor_error` status flag instead.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("no sample available for this polling interval")]
    NoData,
    #[error("sensor bus error")]
    Bus,
}

/// One scaled 6-axis reading straight from the sensor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    /// Acceleration in g, `[x, y, z]`
    pub accel: [f32; 3],
    /// Angular rate in °/s, `[x, y, z]`
    pub gyro: [f32; 3],
    pub timestamp: Instant,
}

impl RawSample {
    pub const fn new(accel: [f32; 3], gyro: [f32; 3], timestamp: Instant) -> Self {
        Self {
            accel,
            gyro,
            timestamp,
        }
    }

    /// A device lying perfectly still, Z axis up.
    pub const fn at_rest(timestamp: Instant) -> Self {
        Self::new([0.0, 0.0, 1.0], [0.0; 3], timestamp)
    }
}

/// Platform IMU driver.
pub trait ImuSensor {
    fn read(&mut self, now: Instant) -> Result<RawSample, SensorError>;
}

/// Euclidean length of a 3-vector.
pub fn magnitude(v: [f32; 3]) -> f32 {
    libm::sqrtf(v[0] * v[0] + v[1] * v[1] + v[2] * v[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_magnitude() {
        assert!((magnitude([3.0, 4.0, 0.0]) - 5.0).abs() < 1e-6);
        assert_eq!(magnitude([0.0; 3]), 0.0);
    }
}
