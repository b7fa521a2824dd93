//! Daily practice statistics.
//!
//! [`StatsStore`] keeps the aggregate for *today* and a [`HistoryRing`] of
//! completed days. A finished session is folded into today; when the date
//! changes, today is pushed onto the ring (with zeroed placeholder days for
//! gaps) and a fresh day starts.
//!
//! Rollover is split in two so the runtime can persist the new records
//! before the in-memory state changes:
//!
//! ```text
//! prepare_rollover(date) -> Rollover::NewDay(prepared)
//!                              |
//!                   write prepared.today / prepared.history
//!                              |
//! apply_rollover(prepared)  (commit)
//! ```

mod calendar;
mod history;

pub use calendar::*;
pub use history::*;

use embassy_time::{Duration, Instant};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::{DATA_SAVE_INTERVAL, MAX_HISTORY_DAYS};
use crate::session::{PracticeSession, SessionController};
use crate::storage::{PersistencePort, RecordKey, StorageError, save_record};

// ---------------------------------------------------------------------------
// Daily aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: CalendarDate,
    pub total_duration_ms: u64,
    pub session_count: u32,
    pub avg_score: f32,
    pub best_score: f32,
    pub total_breaks: u32,
}

impl DailyStats {
    pub const fn empty(date: CalendarDate) -> Self {
        Self {
            date,
            total_duration_ms: 0,
            session_count: 0,
            avg_score: 0.0,
            best_score: 0.0,
            total_breaks: 0,
        }
    }

    pub fn total_duration(&self) -> Duration {
        Duration::from_millis(self.total_duration_ms)
    }

    /// Fold a finished session into this day.
    ///
    /// Breaks that were already credited while the session was live are not
    /// counted a second time.
    pub fn fold_session(&mut self, session: &PracticeSession) {
        self.session_count += 1;
        let n = self.session_count as f32;

        self.total_duration_ms += session.accumulated.as_millis();
        self.best_score = self.best_score.max(session.max_score);
        self.total_breaks += session.uncredited_breaks();
        self.avg_score = (self.avg_score * (n - 1.0) + session.avg_score) / n;
    }
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Totals across several days.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StatsSummary {
    pub days: u32,
    pub total_duration_ms: u64,
    pub total_sessions: u32,
    /// Weighted by session count
    pub avg_score: f32,
    pub best_score: f32,
    pub total_breaks: u32,
}

impl StatsSummary {
    pub fn from_days<'a>(days: impl IntoIterator<Item = &'a DailyStats>) -> Self {
        let mut summary = Self::default();
        let mut weighted = 0.0f32;

        for day in days {
            summary.days += 1;
            summary.total_duration_ms += day.total_duration_ms;
            summary.total_sessions += day.session_count;
            summary.best_score = summary.best_score.max(day.best_score);
            summary.total_breaks += day.total_breaks;
            weighted += day.avg_score * day.session_count as f32;
        }

        if summary.total_sessions > 0 {
            summary.avg_score = weighted / summary.total_sessions as f32;
        }
        summary
    }
}

// ---------------------------------------------------------------------------
// Rollover
// ---------------------------------------------------------------------------

/// New state computed by [`StatsStore::prepare_rollover`], not yet committed.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRollover {
    pub days_diff: u32,
    pub placeholders: u32,
    pub today: DailyStats,
    pub history: HistoryRing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rollover {
    SameDay,
    /// The calendar moved backwards; today is kept under the new date.
    ClockWentBack(CalendarDate),
    NewDay(PreparedRollover),
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StatsStore {
    today: DailyStats,
    history: HistoryRing,
    dirty: bool,
    last_save: Option<Instant>,
}

impl StatsStore {
    pub fn new(today: DailyStats, history: HistoryRing) -> Self {
        Self {
            today,
            history,
            dirty: false,
            last_save: None,
        }
    }

    pub fn today(&self) -> &DailyStats {
        &self.today
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn last_checked_date(&self) -> CalendarDate {
        self.today.date
    }

    /// Credit one break to today and to the live session, if any.
    pub fn add_break_event(&mut self, session: &mut SessionController) {
        self.today.total_breaks += 1;
        session.record_break(true);
        self.dirty = true;
    }

    pub fn fold_session(&mut self, session: &PracticeSession) {
        self.today.fold_session(session);
        self.dirty = true;
        info!(
            "Session folded into {}: {} sessions, avg {:.1}, best {:.1}",
            self.today.date, self.today.session_count, self.today.avg_score, self.today.best_score
        );
    }

    /// Compute what a rollover to `current` would produce. Does not mutate.
    pub fn prepare_rollover(&self, current: CalendarDate) -> Rollover {
        let diff = current.days_since(&self.today.date);
        if diff == 0 {
            return Rollover::SameDay;
        }
        if diff < 0 {
            return Rollover::ClockWentBack(current);
        }

        let days_diff = u32::try_from(diff).unwrap_or(u32::MAX);
        let mut history = self.history.clone();
        history.push(self.today);

        // Only the most recent gap days can survive in the ring.
        let gap = days_diff.saturating_sub(2);
        let placeholders = gap.min(MAX_HISTORY_DAYS as u32);
        let first = gap - placeholders + 1;
        for date in (first..=gap).filter_map(|i| self.today.date.add_days(i)) {
            history.push(DailyStats::empty(date));
        }

        Rollover::NewDay(PreparedRollover {
            days_diff,
            placeholders,
            today: DailyStats::empty(current),
            history,
        })
    }

    /// Commit a prepared rollover. The store stays dirty until the next
    /// successful [`StatsStore::mark_saved`].
    pub fn apply_rollover(&mut self, prepared: PreparedRollover) {
        info!(
            "Day rollover {} -> {} ({} days, {} placeholders)",
            self.today.date, prepared.today.date, prepared.days_diff, prepared.placeholders
        );
        self.today = prepared.today;
        self.history = prepared.history;
        self.dirty = true;
    }

    /// Adopt a date that lies before today without touching the counters.
    pub fn adopt_earlier_date(&mut self, date: CalendarDate) {
        warn!(
            "Calendar went backwards ({} -> {}), keeping today's statistics",
            self.today.date, date
        );
        self.today.date = date;
        self.dirty = true;
    }

    /// Prepare and commit in one step, without persisting.
    ///
    /// Returns the number of days advanced.
    pub fn roll_over(&mut self, current: CalendarDate) -> Option<u32> {
        match self.prepare_rollover(current) {
            Rollover::NewDay(prepared) => {
                let days = prepared.days_diff;
                self.apply_rollover(prepared);
                Some(days)
            }
            Rollover::ClockWentBack(date) => {
                self.adopt_earlier_date(date);
                None
            }
            Rollover::SameDay => None,
        }
    }

    pub fn needs_save(&self, now: Instant) -> bool {
        self.dirty
            || self
                .last_save
                .is_none_or(|t| now.saturating_duration_since(t) > DATA_SAVE_INTERVAL)
    }

    pub fn mark_saved(&mut self, now: Instant) {
        self.dirty = false;
        self.last_save = Some(now);
    }

    /// Write today and the history ring.
    ///
    /// The dirty flag is cleared whatever the outcome; a failed write is
    /// retried at the next save interval.
    pub fn save<P: PersistencePort>(&mut self, port: &mut P, now: Instant) -> Result<(), StorageError> {
        let result = save_record(port, RecordKey::TodayStats, &self.today)
            .and_then(|()| save_record(port, RecordKey::History, &self.history));
        self.mark_saved(now);
        result
    }

    pub fn summary(&self) -> StatsSummary {
        StatsSummary::from_days(core::iter::once(&self.today).chain(self.history.iter()))
    }

    /// Today plus the six most recent completed days.
    pub fn weekly_summary(&self) -> StatsSummary {
        StatsSummary::from_days(core::iter::once(&self.today).chain(self.history.iter().take(6)))
    }
}
