//! Stability scoring and break detection.
//!
//! Every conditioned sample is turned into a 0-100 score. Scores go into a
//! fixed window from which the rolling average and population variance are
//! derived. A *break* is a transition from stable to unstable; it is counted
//! once per continuous unstable span and never twice within
//! [`BREAK_DEBOUNCE`].

use embassy_time::Instant;
use heapless::Deque;
use log::{debug, trace};

use crate::config::{BREAK_DEBOUNCE, STABILITY_WINDOW_SIZE};
use crate::sensors::{ConditionedSample, magnitude};

// ---------------------------------------------------------------------------
// Scoring
// ---------------------------------------------------------------------------

/// Score of a single sample.
///
/// ```text
/// accel_score = max(0, 100 - 200 * | |a| - 1 |)
/// gyro_score  = max(0, 100 - 10 * |g|)
/// score       = clamp(0.6 * accel_score + 0.4 * gyro_score, 0, 100)
/// ```
pub fn compute_score(sample: &ConditionedSample) -> f32 {
    let accel_mag = magnitude(sample.accel);
    let gyro_mag = magnitude(sample.gyro);

    let accel_score = (100.0 - 200.0 * libm::fabsf(accel_mag - 1.0)).max(0.0);
    let gyro_score = (100.0 - 10.0 * gyro_mag).max(0.0);

    let score = 0.6 * accel_score + 0.4 * gyro_score;
    // NaN input (a broken sensor) scores as fully unstable.
    if score.is_nan() {
        return 0.0;
    }
    score.clamp(0.0, 100.0)
}

/// `true` when `score` meets the stability threshold.
pub fn is_stable(score: f32, threshold: f32) -> bool {
    score >= threshold
}

// ---------------------------------------------------------------------------
// Score window
// ---------------------------------------------------------------------------

/// The last [`STABILITY_WINDOW_SIZE`] scores, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ScoreWindow {
    scores: Deque<f32, STABILITY_WINDOW_SIZE>,
}

impl ScoreWindow {
    pub fn new() -> Self {
        Self {
            scores: Deque::new(),
        }
    }

    pub fn push(&mut self, score: f32) {
        if self.scores.is_full() {
            self.scores.pop_front();
        }
        // Cannot fail: a slot was just freed.
        let _ = self.scores.push_back(score);
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    pub fn clear(&mut self) {
        self.scores.clear();
    }

    pub fn average(&self) -> f32 {
        if self.scores.is_empty() {
            return 0.0;
        }
        self.scores.iter().sum::<f32>() / self.scores.len() as f32
    }

    /// Population variance over the stored scores.
    pub fn variance(&self) -> f32 {
        if self.scores.is_empty() {
            return 0.0;
        }
        let mean = self.average();
        self.scores
            .iter()
            .map(|s| (s - mean) * (s - mean))
            .sum::<f32>()
            / self.scores.len() as f32
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Snapshot of the engine after the latest reading.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StabilityScore {
    pub value: f32,
    pub average: f32,
    pub variance: f32,
    pub is_stable: bool,
    /// Start of the current break debounce window
    pub last_break_time: Option<Instant>,
    pub break_count: u32,
}

/// Result of feeding one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityUpdate {
    pub score: StabilityScore,
    pub break_detected: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StabilityEngine {
    window: ScoreWindow,
    current: StabilityScore,
    /// Set by a stable reading, consumed by the next unstable one.
    armed: bool,
}

impl StabilityEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> &StabilityScore {
        &self.current
    }

    pub fn window(&self) -> &ScoreWindow {
        &self.window
    }

    /// Score `sample` against `threshold` and advance the window.
    pub fn update(
        &mut self,
        sample: &ConditionedSample,
        threshold: f32,
        now: Instant,
    ) -> StabilityUpdate {
        let value = compute_score(sample);
        self.window.push(value);

        let stable = is_stable(value, threshold);
        let mut break_detected = false;

        if stable {
            self.armed = true;
        } else if self.armed {
            self.armed = false;

            let debounced = match self.current.last_break_time {
                Some(last) => now.saturating_duration_since(last) >= BREAK_DEBOUNCE,
                None => true,
            };
            if debounced {
                self.current.break_count += 1;
                self.current.last_break_time = Some(now);
                break_detected = true;
                debug!(
                    "Break detected at {} ms (score {:.1}, total {})",
                    now.as_millis(),
                    value,
                    self.current.break_count
                );
            } else {
                trace!("Break suppressed by debounce at {} ms", now.as_millis());
            }
        }

        self.current.value = value;
        self.current.average = self.window.average();
        self.current.variance = self.window.variance();
        self.current.is_stable = stable;

        StabilityUpdate {
            score: self.current,
            break_detected,
        }
    }

    /// Forget the score history and break counter, e.g. at session start.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
