//! User settings and their debounced persistence.

use embassy_time::{Duration, Instant};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{
    DEFAULT_BRIGHTNESS, DEFAULT_PRACTICE_TIME_MS, DEFAULT_SLEEP_TIMEOUT_MS,
    DEFAULT_STABILITY_THRESHOLD, MAX_PRACTICE_TIME_MS, PRACTICE_TIME_STEP_MS,
    SETTINGS_SAVE_DEBOUNCE, THRESHOLD_STEP,
};
use crate::storage::{PersistencePort, RecordKey, StorageError, save_record};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Language {
    #[default]
    English,
    Chinese,
}

/// Persisted user configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SystemSettings {
    /// Minimum score counted as stable, `0..=100`
    pub stability_threshold: f32,
    pub sound_enabled: bool,
    pub practice_time_ms: u64,
    pub auto_sleep: bool,
    pub sleep_timeout_ms: u64,
    pub calibration_enabled: bool,
    pub brightness: u8,
    pub language: Language,
}

impl Default for SystemSettings {
    fn default() -> Self {
        Self {
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
            sound_enabled: true,
            practice_time_ms: DEFAULT_PRACTICE_TIME_MS,
            auto_sleep: true,
            sleep_timeout_ms: DEFAULT_SLEEP_TIMEOUT_MS,
            calibration_enabled: true,
            brightness: DEFAULT_BRIGHTNESS,
            language: Language::English,
        }
    }
}

impl SystemSettings {
    pub fn practice_time(&self) -> Duration {
        Duration::from_millis(self.practice_time_ms)
    }

    pub fn sleep_timeout(&self) -> Duration {
        Duration::from_millis(self.sleep_timeout_ms)
    }

    /// Clamp values that may have been written by an older firmware.
    pub fn sanitized(mut self) -> Self {
        if !(0.0..=100.0).contains(&self.stability_threshold) {
            warn!(
                "Stability threshold {} out of range, resetting",
                self.stability_threshold
            );
            self.stability_threshold = DEFAULT_STABILITY_THRESHOLD;
        }
        if self.practice_time_ms == 0 || self.practice_time_ms > MAX_PRACTICE_TIME_MS {
            self.practice_time_ms = DEFAULT_PRACTICE_TIME_MS;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Settings page items
// ---------------------------------------------------------------------------

/// Editable entries on the settings page, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettingsItem {
    #[default]
    StabilityThreshold,
    Sound,
    AutoSleep,
    PracticeTime,
    ResetDefaults,
}

impl SettingsItem {
    pub const ALL: [SettingsItem; 5] = [
        Self::StabilityThreshold,
        Self::Sound,
        Self::AutoSleep,
        Self::PracticeTime,
        Self::ResetDefaults,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            Self::StabilityThreshold => "Stability threshold",
            Self::Sound => "Sound",
            Self::AutoSleep => "Auto sleep",
            Self::PracticeTime => "Practice time",
            Self::ResetDefaults => "Reset to defaults",
        }
    }

    pub const fn next(self) -> Self {
        match self {
            Self::StabilityThreshold => Self::Sound,
            Self::Sound => Self::AutoSleep,
            Self::AutoSleep => Self::PracticeTime,
            Self::PracticeTime => Self::ResetDefaults,
            Self::ResetDefaults => Self::StabilityThreshold,
        }
    }

    /// Step the value of this item, wrapping at the end of its range.
    /// [`SettingsItem::ResetDefaults`] restores every setting instead.
    pub fn adjust(self, settings: &mut SystemSettings) {
        match self {
            Self::StabilityThreshold => {
                let next = settings.stability_threshold + THRESHOLD_STEP;
                settings.stability_threshold = if next > 100.0 { 0.0 } else { next };
            }
            Self::Sound => settings.sound_enabled = !settings.sound_enabled,
            Self::AutoSleep => settings.auto_sleep = !settings.auto_sleep,
            Self::PracticeTime => {
                let next = settings.practice_time_ms + PRACTICE_TIME_STEP_MS;
                settings.practice_time_ms = if next > MAX_PRACTICE_TIME_MS {
                    PRACTICE_TIME_STEP_MS
                } else {
                    next
                };
            }
            Self::ResetDefaults => *settings = SystemSettings::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Live settings plus the debounce state of their next write.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
    settings: SystemSettings,
    /// Time of the last unsaved change
    pending_since: Option<Instant>,
}

impl SettingsStore {
    pub fn new(settings: SystemSettings) -> Self {
        Self {
            settings,
            pending_since: None,
        }
    }

    pub fn get(&self) -> &SystemSettings {
        &self.settings
    }

    pub fn is_dirty(&self) -> bool {
        self.pending_since.is_some()
    }

    /// Flag the settings for writing at the next opportunity.
    pub fn mark_dirty(&mut self, now: Instant) {
        self.pending_since = Some(now);
    }

    pub fn update(&mut self, now: Instant, f: impl FnOnce(&mut SystemSettings)) {
        let before = self.settings;
        f(&mut self.settings);
        if self.settings != before {
            self.pending_since = Some(now);
        }
    }

    pub fn adjust(&mut self, item: SettingsItem, now: Instant) {
        self.update(now, |s| item.adjust(s));
        info!("Setting '{}' adjusted", item.label());
    }

    /// `true` once the latest change has been left alone for the debounce.
    pub fn save_due(&self, now: Instant) -> bool {
        self.pending_since
            .is_some_and(|t| now.saturating_duration_since(t) >= SETTINGS_SAVE_DEBOUNCE)
    }

    /// Write the settings now, regardless of the debounce.
    pub fn save<P: PersistencePort>(&mut self, port: &mut P) -> Result<(), StorageError> {
        self.pending_since = None;
        save_record(port, RecordKey::Settings, &self.settings)
    }

    /// Write the settings if the debounce expired. Returns whether a write
    /// was attempted.
    pub fn save_if_due<P: PersistencePort>(
        &mut self,
        port: &mut P,
        now: Instant,
    ) -> Result<bool, StorageError> {
        if !self.save_due(now) {
            return Ok(false);
        }
        self.save(port).map(|()| true)
    }
}
