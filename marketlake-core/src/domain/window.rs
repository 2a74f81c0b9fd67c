use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

/// Inclusive range of exchange-local timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl TimeRange {
    pub fn new(start: NaiveDateTime, end: NaiveDateTime) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self {
                start: end,
                end: start,
            }
        }
    }

    /// Whole calendar days from `start` through `end`.
    pub fn days(start: NaiveDate, end: NaiveDate) -> Self {
        let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        Self::new(start.and_time(NaiveTime::MIN), end.and_time(end_of_day))
    }

    pub fn day(date: NaiveDate) -> Self {
        Self::days(date, date)
    }

    /// The `hours` before `end`, inclusive of `end`.
    pub fn trailing(end: NaiveDateTime, hours: i64) -> Self {
        Self::new(end - Duration::hours(hours), end)
    }

    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Calendar dates touched by the range.
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut out = Vec::new();
        let mut d = self.start.date();
        while d <= self.end.date() {
            out.push(d);
            match d.succ_opt() {
                Some(next) => d = next,
                None => break,
            }
        }
        out
    }
}
