//! Practice session timing.
//!
//! ```text
//! NotStarted -> Running <-> Paused
//!                  \          /
//!                   -> Stopped
//! ```
//!
//! Time is accounted in running intervals: each `pause`/`stop` adds the
//! interval since the last `start`/`resume` to `accumulated`, so the reported
//! duration never moves backwards and excludes paused time.
//!
//! `avg_score` is a true running mean (`sum / count`) over every score seen
//! while running. It always lies within `[min_score, max_score]`.

use embassy_time::{Duration, Instant};
use log::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    NotStarted,
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PracticeSession {
    pub phase: SessionPhase,
    /// Start of the current running interval
    pub start_time: Option<Instant>,
    pub accumulated: Duration,
    pub avg_score: f32,
    pub min_score: f32,
    pub max_score: f32,
    pub break_count: u32,
    /// Breaks already added to today's total while the session was live
    pub breaks_credited: u32,
    pub completed: bool,
    score_sum: f32,
    score_samples: u32,
}

impl Default for PracticeSession {
    fn default() -> Self {
        Self {
            phase: SessionPhase::NotStarted,
            start_time: None,
            accumulated: Duration::from_ticks(0),
            avg_score: 0.0,
            min_score: 0.0,
            max_score: 0.0,
            break_count: 0,
            breaks_credited: 0,
            completed: false,
            score_sum: 0.0,
            score_samples: 0,
        }
    }
}

impl PracticeSession {
    pub fn score_samples(&self) -> u32 {
        self.score_samples
    }

    /// Breaks not yet credited to the daily totals.
    pub fn uncredited_breaks(&self) -> u32 {
        self.break_count.saturating_sub(self.breaks_credited)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionController {
    session: PracticeSession,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session(&self) -> &PracticeSession {
        &self.session
    }

    pub fn phase(&self) -> SessionPhase {
        self.session.phase
    }

    /// Running and not paused.
    pub fn is_running(&self) -> bool {
        self.session.phase == SessionPhase::Running
    }

    pub fn is_paused(&self) -> bool {
        self.session.phase == SessionPhase::Paused
    }

    /// Running or paused.
    pub fn is_active(&self) -> bool {
        matches!(
            self.session.phase,
            SessionPhase::Running | SessionPhase::Paused
        )
    }

    /// Begin a fresh session. No-op while a session is active.
    pub fn start(&mut self, now: Instant) {
        if self.is_active() {
            return;
        }

        self.session = PracticeSession {
            phase: SessionPhase::Running,
            start_time: Some(now),
            ..PracticeSession::default()
        };
        info!("Session started at {} ms", now.as_millis());
    }

    pub fn pause(&mut self, now: Instant) {
        if !self.is_running() {
            return;
        }

        self.close_interval(now);
        self.session.phase = SessionPhase::Paused;
        debug!(
            "Session paused after {} ms",
            self.session.accumulated.as_millis()
        );
    }

    pub fn resume(&mut self, now: Instant) {
        if !self.is_paused() {
            return;
        }

        self.session.start_time = Some(now);
        self.session.phase = SessionPhase::Running;
        debug!("Session resumed at {} ms", now.as_millis());
    }

    /// Finalize the session and hand it back for folding into the daily
    /// statistics. Returns `None` if no session was active.
    pub fn stop(&mut self, now: Instant) -> Option<PracticeSession> {
        if !self.is_active() {
            return None;
        }

        if self.is_running() {
            self.close_interval(now);
        }
        self.session.phase = SessionPhase::Stopped;
        self.session.completed = true;

        info!(
            "Session stopped: {} ms, avg {:.1}, breaks {}",
            self.session.accumulated.as_millis(),
            self.session.avg_score,
            self.session.break_count
        );
        Some(self.session)
    }

    pub fn current_duration(&self, now: Instant) -> Duration {
        match (self.session.phase, self.session.start_time) {
            (SessionPhase::Running, Some(start)) => {
                self.session.accumulated + now.saturating_duration_since(start)
            }
            _ => self.session.accumulated,
        }
    }

    pub fn update_score(&mut self, score: f32) {
        if !self.is_running() {
            return;
        }

        let s = &mut self.session;
        if s.score_samples == 0 {
            s.min_score = score;
            s.max_score = score;
        } else {
            s.min_score = s.min_score.min(score);
            s.max_score = s.max_score.max(score);
        }
        s.score_sum += score;
        s.score_samples += 1;
        // Clamp against float drift in the running sum.
        s.avg_score = (s.score_sum / s.score_samples as f32).clamp(s.min_score, s.max_score);
    }

    /// Count a break against the live session.
    ///
    /// `credited` marks it as already included in today's totals.
    pub fn record_break(&mut self, credited: bool) -> bool {
        if !self.is_active() {
            return false;
        }
        self.session.break_count += 1;
        if credited {
            self.session.breaks_credited += 1;
        }
        true
    }

    /// Drop the session, e.g. after it has been folded.
    pub fn clear(&mut self) {
        self.session = PracticeSession::default();
    }

    fn close_interval(&mut self, now: Instant) {
        if let Some(start) = self.session.start_time.take() {
            self.session.accumulated += now.saturating_duration_since(start);
        }
    }
}
