//! Calendar dates for day rollover, backed by [`chrono::NaiveDate`].

use core::fmt;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// A real calendar day. Impossible dates cannot be constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalendarDate(NaiveDate);

impl CalendarDate {
    /// Build a date, rejecting impossible ones.
    pub fn new(year: u16, month: u8, day: u8) -> Option<Self> {
        NaiveDate::from_ymd_opt(year.into(), month.into(), day.into()).map(Self)
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    /// Signed number of days from `earlier` to `self`.
    pub fn days_since(&self, earlier: &CalendarDate) -> i64 {
        self.0.signed_duration_since(earlier.0).num_days()
    }

    /// `None` past the end of the representable calendar.
    pub fn add_days(&self, days: u32) -> Option<Self> {
        self.0.checked_add_days(Days::new(u64::from(days))).map(Self)
    }
}

impl From<NaiveDate> for CalendarDate {
    fn from(date: NaiveDate) -> Self {
        Self(date)
    }
}

impl fmt::Display for CalendarDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
