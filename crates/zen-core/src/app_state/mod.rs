//! Application-wide context and error types for zen-motion
//!
//! [`AppState`] owns every component of the pipeline. It is owned by the
//! runtime ([`crate::device::ZenDevice`]) and lent to component operations;
//! no component holds a reference back to it.

use embassy_time::Instant;
use log::{debug, warn};
use thiserror_no_std::Error;

use crate::power::{ActivityTracker, BatteryMonitor};
use crate::sensors::{
    CalibrationError, CalibrationProfile, Calibrator, RawSample, SensorError, SignalConditioner,
};
use crate::session::{PracticeSession, SessionController};
use crate::settings::{SettingsStore, SystemSettings};
use crate::stability::{StabilityEngine, StabilityUpdate};
use crate::state_machine::{SystemState, Trigger};
use crate::stats::{DailyStats, HistoryRing, StatsStore};
use crate::storage::StorageError;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZenError {
    #[error("sensor error: {0}")]
    Sensor(SensorError),
    #[error("calibration error: {0}")]
    Calibration(CalibrationError),
    #[error("storage error: {0}")]
    Storage(StorageError),
    #[error("transition {trigger:?} not allowed in state {state:?}")]
    InvalidTransition { state: SystemState, trigger: Trigger },
}

impl From<SensorError> for ZenError {
    fn from(e: SensorError) -> Self {
        Self::Sensor(e)
    }
}

impl From<CalibrationError> for ZenError {
    fn from(e: CalibrationError) -> Self {
        Self::Calibration(e)
    }
}

impl From<StorageError> for ZenError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

/// A state/component mismatch found after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inconsistency {
    /// Practicing without a running session, or the reverse
    Session { state: SystemState, running: bool },
    /// Calibrating without a calibration run, or the reverse
    Calibration { state: SystemState, in_progress: bool },
}

/// Main application context.
pub struct AppState {
    pub conditioner: SignalConditioner,
    pub calibration: CalibrationProfile,
    pub calibrator: Calibrator,
    pub engine: StabilityEngine,
    pub session: SessionController,
    pub stats: StatsStore,
    pub settings: SettingsStore,
    pub battery: BatteryMonitor,
    pub activity: ActivityTracker,
    /// Raised while the IMU fails to deliver samples
    pub sensor_error: bool,
    /// The calibration profile changed and has not been written yet
    pub calibration_dirty: bool,
}

impl AppState {
    pub fn new(
        settings: SystemSettings,
        today: DailyStats,
        history: HistoryRing,
        calibration: CalibrationProfile,
        now: Instant,
    ) -> Self {
        Self {
            conditioner: SignalConditioner::default(),
            calibration,
            calibrator: Calibrator::new(),
            engine: StabilityEngine::new(),
            session: SessionController::new(),
            stats: StatsStore::new(today, history),
            settings: SettingsStore::new(settings),
            battery: BatteryMonitor::new(),
            activity: ActivityTracker::new(now),
            sensor_error: false,
            calibration_dirty: false,
        }
    }

    /// Profile applied to samples; disabled calibration means raw readings.
    pub fn active_profile(&self) -> CalibrationProfile {
        if self.settings.get().calibration_enabled {
            self.calibration
        } else {
            CalibrationProfile::default()
        }
    }

    /// Start a calibration run, refusing while the sensor is failing.
    pub fn begin_calibration(&mut self) -> Result<(), CalibrationError> {
        if self.sensor_error {
            return Err(CalibrationError::SensorUnavailable);
        }
        self.calibrator.start()
    }

    /// Finish the running calibration and adopt its profile.
    pub fn complete_calibration(&mut self, now: Instant) -> Result<(), CalibrationError> {
        let profile = self.calibrator.finish(now)?;
        self.calibration = profile;
        self.calibration_dirty = true;
        self.conditioner.reset();
        self.engine.reset();
        Ok(())
    }

    /// Record the outcome of one sensor poll.
    ///
    /// A failed read keeps the last score and leaves the window untouched.
    pub fn record_sensor_result(&mut self, result: Result<RawSample, SensorError>) -> Option<RawSample> {
        match result {
            Ok(raw) => {
                if self.sensor_error {
                    debug!("Sensor recovered");
                }
                self.sensor_error = false;
                Some(raw)
            }
            Err(e) => {
                if !self.sensor_error {
                    warn!("Sensor read failed: {}", e);
                }
                self.sensor_error = true;
                None
            }
        }
    }

    /// Run one raw sample through conditioning and scoring.
    ///
    /// While calibrating, samples feed the calibrator instead and `None` is
    /// returned. Scores reach the session only when `practicing`; detected
    /// breaks are credited to today (and any live session) in every state.
    pub fn process_sample(
        &mut self,
        raw: &RawSample,
        now: Instant,
        practicing: bool,
    ) -> Option<StabilityUpdate> {
        if self.calibrator.is_in_progress() {
            self.calibrator.feed(raw);
            return None;
        }

        let profile = self.active_profile();
        let conditioned = self.conditioner.condition(raw, &profile);
        let update = self.engine.update(
            &conditioned,
            self.settings.get().stability_threshold,
            now,
        );

        if practicing {
            self.session.update_score(update.score.value);
        }
        if update.break_detected {
            self.stats.add_break_event(&mut self.session);
        }
        Some(update)
    }

    /// Stop the live session and fold it into today.
    pub fn finish_session(&mut self, now: Instant) -> Option<PracticeSession> {
        let finished = self.session.stop(now)?;
        self.stats.fold_session(&finished);
        self.session.clear();
        Some(finished)
    }

    /// Compare component state with the machine's state.
    pub fn check_consistency(&self, state: SystemState) -> Option<Inconsistency> {
        let running = self.session.is_running();
        if (state == SystemState::Practicing) != running {
            return Some(Inconsistency::Session { state, running });
        }

        let in_progress = self.calibrator.is_in_progress();
        if (state == SystemState::Calibrating) != in_progress {
            return Some(Inconsistency::Calibration { state, in_progress });
        }
        None
    }

    /// Bring the components back in line with `state`, which is authoritative.
    pub fn reconcile(&mut self, state: SystemState, now: Instant) {
        match (state, self.session.is_running()) {
            (SystemState::Practicing, false) => {
                warn!("Reconcile: resuming session for Practicing");
                if self.session.is_paused() {
                    self.session.resume(now);
                } else {
                    self.session.start(now);
                }
            }
            (SystemState::Paused, true) => {
                warn!("Reconcile: pausing session for Paused");
                self.session.pause(now);
            }
            (s, true) if s != SystemState::Practicing => {
                warn!("Reconcile: stopping session outside practice");
                self.finish_session(now);
            }
            _ => {}
        }

        let in_progress = self.calibrator.is_in_progress();
        if state == SystemState::Calibrating && !in_progress {
            warn!("Reconcile: restarting calibration run");
            if let Err(e) = self.calibrator.start() {
                warn!("Reconcile: calibration restart failed: {}", e);
            }
        } else if state != SystemState::Calibrating && in_progress {
            warn!("Reconcile: cancelling stray calibration run");
            self.calibrator.cancel();
        }
    }
}
