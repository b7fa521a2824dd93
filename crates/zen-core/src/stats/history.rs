use heapless::{Deque, Vec};
use serde::{Deserialize, Serialize};

use super::DailyStats;
use crate::config::MAX_HISTORY_DAYS;

/// Completed days, most recent first. Pushing onto a full ring evicts the
/// oldest day.
///
/// Serialized as a plain list in the same order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(
    from = "Vec<DailyStats, MAX_HISTORY_DAYS>",
    into = "Vec<DailyStats, MAX_HISTORY_DAYS>"
)]
pub struct HistoryRing {
    days: Deque<DailyStats, MAX_HISTORY_DAYS>,
}

impl HistoryRing {
    pub const CAPACITY: usize = MAX_HISTORY_DAYS;

    pub fn new() -> Self {
        Self { days: Deque::new() }
    }

    /// Add the most recently completed day. Returns the evicted day, if any.
    pub fn push(&mut self, day: DailyStats) -> Option<DailyStats> {
        let evicted = if self.days.is_full() {
            self.days.pop_back()
        } else {
            None
        };
        // Cannot fail: there is room after the eviction above.
        let _ = self.days.push_front(day);
        evicted
    }

    /// `index` 0 is the most recent day.
    pub fn get(&self, index: usize) -> Option<&DailyStats> {
        self.days.iter().nth(index)
    }

    pub fn latest(&self) -> Option<&DailyStats> {
        self.days.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DailyStats> {
        self.days.iter()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn clear(&mut self) {
        self.days.clear();
    }
}

impl PartialEq for HistoryRing {
    fn eq(&self, other: &Self) -> bool {
        self.days.iter().eq(other.days.iter())
    }
}

impl From<Vec<DailyStats, MAX_HISTORY_DAYS>> for HistoryRing {
    fn from(list: Vec<DailyStats, MAX_HISTORY_DAYS>) -> Self {
        let mut days = Deque::new();
        for day in list {
            let _ = days.push_back(day);
        }
        Self { days }
    }
}

impl From<HistoryRing> for Vec<DailyStats, MAX_HISTORY_DAYS> {
    fn from(ring: HistoryRing) -> Self {
        ring.days.iter().copied().collect()
    }
}
