//! Zero-offset calibration.
//!
//! The device is held still while [`CALIBRATION_SAMPLES`] raw readings are
//! summed. The mean of each axis becomes its offset, except accel Z which
//! keeps 1 g of gravity: its offset is `mean - 1.0`.
//!
//! A run only ever produces a *new* profile. The profile currently in use is
//! never touched here, so a cancelled or incomplete run cannot corrupt it.

use embassy_time::Instant;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use super::RawSample;
use crate::config::CALIBRATION_SAMPLES;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationError {
    #[error("calibration finished before enough samples were collected")]
    Incomplete,
    #[error("calibration was cancelled")]
    Cancelled,
    #[error("a calibration run is already in progress")]
    AlreadyRunning,
    #[error("sensor unavailable, cannot calibrate")]
    SensorUnavailable,
}

/// Per-axis offsets subtracted from every raw reading.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CalibrationProfile {
    pub accel_offset: [f32; 3],
    pub gyro_offset: [f32; 3],
    pub calibrated: bool,
    /// Clock reading when the profile was produced
    pub calibrated_at_ms: u64,
}

impl CalibrationProfile {
    pub fn calibrated(accel_offset: [f32; 3], gyro_offset: [f32; 3], at: Instant) -> Self {
        Self {
            accel_offset,
            gyro_offset,
            calibrated: true,
            calibrated_at_ms: at.as_millis(),
        }
    }

    /// Subtract the offsets when calibrated; otherwise pass through.
    pub fn apply(&self, accel: [f32; 3], gyro: [f32; 3]) -> ([f32; 3], [f32; 3]) {
        if !self.calibrated {
            return (accel, gyro);
        }

        let mut a = accel;
        let mut g = gyro;
        for axis in 0..3 {
            a[axis] -= self.accel_offset[axis];
            g[axis] -= self.gyro_offset[axis];
        }
        (a, g)
    }
}

/// Accumulator for one calibration run.
#[derive(Debug, Clone, Default)]
pub struct Calibrator {
    in_progress: bool,
    collected: u16,
    accel_sum: [f32; 3],
    gyro_sum: [f32; 3],
}

impl Calibrator {
    pub const fn new() -> Self {
        Self {
            in_progress: false,
            collected: 0,
            accel_sum: [0.0; 3],
            gyro_sum: [0.0; 3],
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn collected(&self) -> u16 {
        self.collected
    }

    pub fn is_complete(&self) -> bool {
        self.in_progress && self.collected >= CALIBRATION_SAMPLES
    }

    /// Progress in percent, for the calibration page.
    pub fn progress_percent(&self) -> u8 {
        let pct = u32::from(self.collected.min(CALIBRATION_SAMPLES)) * 100
            / u32::from(CALIBRATION_SAMPLES);
        pct as u8
    }

    pub fn start(&mut self) -> Result<(), CalibrationError> {
        if self.in_progress {
            return Err(CalibrationError::AlreadyRunning);
        }

        *self = Self::new();
        self.in_progress = true;
        info!("Calibration started, collecting {} samples", CALIBRATION_SAMPLES);
        Ok(())
    }

    /// Add one raw reading. Samples past the target count are ignored.
    ///
    /// Returns `true` once enough samples have been collected.
    pub fn feed(&mut self, raw: &RawSample) -> bool {
        if !self.in_progress {
            return false;
        }

        if self.collected < CALIBRATION_SAMPLES {
            for axis in 0..3 {
                self.accel_sum[axis] += raw.accel[axis];
                self.gyro_sum[axis] += raw.gyro[axis];
            }
            self.collected += 1;

            if self.collected % 25 == 0 {
                debug!(
                    "Calibration progress: {}/{}",
                    self.collected, CALIBRATION_SAMPLES
                );
            }
        }

        self.is_complete()
    }

    /// Compute the new profile and end the run.
    ///
    /// Fails with [`CalibrationError::Incomplete`] before the sample count is
    /// reached; the run stays active in that case so collection can continue.
    pub fn finish(&mut self, now: Instant) -> Result<CalibrationProfile, CalibrationError> {
        if !self.in_progress {
            return Err(CalibrationError::Cancelled);
        }
        if self.collected < CALIBRATION_SAMPLES {
            return Err(CalibrationError::Incomplete);
        }

        let n = f32::from(self.collected);
        let mut accel_offset = [0.0; 3];
        let mut gyro_offset = [0.0; 3];
        for axis in 0..3 {
            accel_offset[axis] = self.accel_sum[axis] / n;
            gyro_offset[axis] = self.gyro_sum[axis] / n;
        }
        // Keep gravity on the Z axis.
        accel_offset[2] -= 1.0;

        *self = Self::new();

        let profile = CalibrationProfile::calibrated(accel_offset, gyro_offset, now);
        info!(
            "Calibration complete: accel {:?} gyro {:?}",
            profile.accel_offset, profile.gyro_offset
        );
        Ok(profile)
    }

    /// Abort the run and discard everything collected.
    ///
    /// Returns `true` if a run was actually cancelled.
    pub fn cancel(&mut self) -> bool {
        let was_running = self.in_progress;
        if was_running {
            info!(
                "Calibration cancelled at {}/{}",
                self.collected, CALIBRATION_SAMPLES
            );
        }
        *self = Self::new();
        was_running
    }
}
