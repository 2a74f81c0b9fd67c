//! Exchange trading hours and bar-boundary arithmetic.
//!
//! Bars are stored with exchange-local wall-clock timestamps, so every
//! conversion from the system clock goes through the configured timezone.

use chrono::{
    DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc,
    Weekday,
};
use chrono_tz::Tz;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarketHours {
    pub timezone: Tz,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl Default for MarketHours {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl MarketHours {
    pub fn new(timezone: Tz, open: NaiveTime, close: NaiveTime) -> Self {
        Self {
            timezone,
            open,
            close,
        }
    }

    /// Exchange-local wall clock at `instant`.
    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.timezone).naive_local()
    }

    /// Converts an exchange-local wall-clock time back to UTC. Ambiguous
    /// times (DST fall-back) take the earlier instant; nonexistent times
    /// (spring-forward gap) shift forward an hour.
    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match self.timezone.from_local_datetime(&local) {
            chrono::LocalResult::Single(t) => t.with_timezone(&Utc),
            chrono::LocalResult::Ambiguous(early, _) => early.with_timezone(&Utc),
            chrono::LocalResult::None => self.to_utc(local + Duration::hours(1)),
        }
    }

    pub fn is_trading_day(date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
    }

    /// True on weekdays between the open and close, inclusive.
    pub fn is_open(&self, instant: DateTime<Utc>) -> bool {
        self.is_open_local(self.local(instant))
    }

    pub fn is_open_local(&self, local: NaiveDateTime) -> bool {
        let t = local.time();
        Self::is_trading_day(local.date()) && t >= self.open && t <= self.close
    }

    /// First bar boundary strictly after `local`.
    pub fn next_boundary(local: NaiveDateTime, interval_minutes: u32) -> NaiveDateTime {
        let floored = Self::floor_to_interval(local, interval_minutes);
        floored + Duration::minutes(i64::from(interval_minutes.max(1)))
    }

    /// Start of the bar interval containing `local`.
    pub fn floor_to_interval(local: NaiveDateTime, interval_minutes: u32) -> NaiveDateTime {
        let interval = interval_minutes.max(1);
        let minute_of_day = local.hour() * 60 + local.minute();
        let floored = minute_of_day - minute_of_day % interval;
        let time = NaiveTime::from_hms_opt(floored / 60, floored % 60, 0).unwrap_or(NaiveTime::MIN);
        local.date().and_time(time)
    }

    /// Weekdays from `start` through `end`, inclusive.
    pub fn trading_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|d| *d <= end)
            .filter(|d| Self::is_trading_day(*d))
            .collect()
    }

    /// Most recent trading day strictly before `date`.
    pub fn previous_trading_day(date: NaiveDate) -> NaiveDate {
        let mut d = date - Duration::days(1);
        while !Self::is_trading_day(d) {
            d -= Duration::days(1);
        }
        d
    }
}

/// Human-friendly duration, e.g. `1h 02m 05s`.
pub fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{:.1}s", d.as_secs_f64())
    }
}
