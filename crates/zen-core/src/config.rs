//! Compile-time tuning for the zen-motion core.
//!
//! Everything that the device does not let the user change lives here. The
//! user-facing knobs are in [`crate::settings::SystemSettings`] and are
//! persisted; their factory values are the `DEFAULT_*` constants below.

use embassy_time::Duration;

// ---------------------------------------------------------------------------
// Signal pipeline
// ---------------------------------------------------------------------------

/// Low-pass coefficient applied to every conditioned axis.
pub const FILTER_ALPHA: f32 = 0.8;

/// Number of scores kept for the rolling average and variance.
pub const STABILITY_WINDOW_SIZE: usize = 20;

/// Number of raw samples averaged by one calibration run.
pub const CALIBRATION_SAMPLES: u16 = 100;

/// A second break is never counted within this window of the first.
pub const BREAK_DEBOUNCE: Duration = Duration::from_millis(1000);

/// Nominal IMU polling period (~20 Hz).
pub const SENSOR_READ_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Statistics and persistence
// ---------------------------------------------------------------------------

/// Number of completed days kept in the history ring.
pub const MAX_HISTORY_DAYS: usize = 7;

/// Upper bound between two statistics writes even when nothing changed.
pub const DATA_SAVE_INTERVAL: Duration = Duration::from_secs(60);

/// Settings are written once they have been left alone for this long.
pub const SETTINGS_SAVE_DEBOUNCE: Duration = Duration::from_secs(2);

/// Largest encoded record the persistence port has to hold.
pub const RECORD_BUFFER_SIZE: usize = 512;

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

/// Length of the boot animation before the main menu appears.
pub const BOOT_ANIMATION_DURATION: Duration = Duration::from_millis(4000);

/// Longest practice duration the settings page allows.
pub const MAX_PRACTICE_TIME_MS: u64 = 3_600_000;

/// Practice duration step used by the settings page.
pub const PRACTICE_TIME_STEP_MS: u64 = 60_000;

/// Stability threshold step used by the settings page.
pub const THRESHOLD_STEP: f32 = 5.0;

// ---------------------------------------------------------------------------
// Power
// ---------------------------------------------------------------------------

/// Below this smoothed voltage the device warns about the battery.
pub const BATTERY_LOW_VOLTAGE: f32 = 3.3;

/// Below this smoothed voltage the device saves and goes to sleep.
pub const BATTERY_CRITICAL_VOLTAGE: f32 = 3.0;

/// Weight of the previous voltage estimate in the battery filter.
pub const BATTERY_SMOOTHING: f32 = 0.8;

// ---------------------------------------------------------------------------
// Factory settings
// ---------------------------------------------------------------------------

pub const DEFAULT_STABILITY_THRESHOLD: f32 = 50.0;
pub const DEFAULT_PRACTICE_TIME_MS: u64 = 300_000;
pub const DEFAULT_SLEEP_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_BRIGHTNESS: u8 = 255;

// ---------------------------------------------------------------------------
// Message durations
// ---------------------------------------------------------------------------

pub const MESSAGE_SHORT_MS: u32 = 500;
pub const MESSAGE_MEDIUM_MS: u32 = 1000;
pub const MESSAGE_LONG_MS: u32 = 2000;
pub const MESSAGE_COMPLETE_MS: u32 = 3000;
