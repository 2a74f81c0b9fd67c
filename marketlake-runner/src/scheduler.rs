//! Cooperative scheduler producing tick events from a clock.
//!
//! Planning is pure: [`Scheduler::plan`] lists the ticks due between two
//! exchange-local instants. [`Scheduler::run`] sleeps to the next event,
//! plans, and hands ticks to the caller one at a time. When a tick runs
//! past later intraday boundaries, those boundaries are skipped and
//! counted rather than queued.

use crate::config::{ConfigError, PipelineConfig, ScheduleTimes};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use marketlake_core::data::MarketHours;
use std::cell::Cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Bar boundary during the session (exchange-local).
    Intraday(NaiveDateTime),
    /// Close-of-day processing for a trading date.
    EndOfDay(NaiveDate),
    /// Morning re-extract of the given (previous) trading date.
    Backfill(NaiveDate),
    WeeklyReport(NaiveDate),
}

impl Tick {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Intraday(_) => "intraday",
            Self::EndOfDay(_) => "end_of_day",
            Self::Backfill(_) => "backfill",
            Self::WeeklyReport(_) => "weekly_report",
        }
    }
}

pub trait Clock {
    fn now(&self) -> DateTime<Utc>;

    fn sleep_until(&self, deadline: DateTime<Utc>);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep_until(&self, deadline: DateTime<Utc>) {
        if let Ok(wait) = (deadline - Utc::now()).to_std() {
            std::thread::sleep(wait);
        }
    }
}

/// Clock that only moves when told to; sleeping jumps straight to the deadline.
pub struct ManualClock {
    now: Cell<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Cell::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep_until(&self, deadline: DateTime<Utc>) {
        if deadline > self.now.get() {
            self.now.set(deadline);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleStats {
    pub ticks_run: usize,
    pub failed: usize,
    /// Intraday boundaries passed while another tick was running.
    pub skipped: usize,
}

pub struct Scheduler {
    market: MarketHours,
    interval_minutes: u32,
    times: ScheduleTimes,
}

impl Scheduler {
    pub fn new(market: MarketHours, interval_minutes: u32, times: ScheduleTimes) -> Self {
        Self {
            market,
            interval_minutes: interval_minutes.max(1),
            times,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.market_hours()?,
            config.elt.bar_interval_minutes,
            config.schedule_times()?,
        ))
    }

    fn daily_events(&self, date: NaiveDate) -> Vec<(NaiveDateTime, Tick)> {
        let mut events = Vec::new();
        if !MarketHours::is_trading_day(date) {
            return events;
        }
        let at = |t: NaiveTime| date.and_time(t);
        events.push((
            at(self.times.backfill),
            Tick::Backfill(MarketHours::previous_trading_day(date)),
        ));
        events.push((at(self.times.end_of_day), Tick::EndOfDay(date)));
        if date.weekday() == self.times.weekly_report_day {
            events.push((at(self.times.weekly_report_time), Tick::WeeklyReport(date)));
        }
        events
    }

    /// Ticks due in `(last, now]`, exchange-local, in time order.
    pub fn plan(&self, last: NaiveDateTime, now: NaiveDateTime) -> Vec<Tick> {
        let mut due: Vec<(NaiveDateTime, Tick)> = Vec::new();
        if now <= last {
            return Vec::new();
        }

        let mut boundary = MarketHours::next_boundary(last, self.interval_minutes);
        while boundary <= now {
            if self.market.is_open_local(boundary) {
                due.push((boundary, Tick::Intraday(boundary)));
            }
            boundary += Duration::minutes(i64::from(self.interval_minutes));
        }

        for date in last.date().iter_days().take_while(|d| *d <= now.date()) {
            due.extend(
                self.daily_events(date)
                    .into_iter()
                    .filter(|(at, _)| *at > last && *at <= now),
            );
        }

        due.sort_by_key(|(at, _)| *at);
        due.into_iter().map(|(_, tick)| tick).collect()
    }

    /// Earliest instant after `now` at which some tick could be due.
    pub fn next_wakeup(&self, now: NaiveDateTime) -> NaiveDateTime {
        let mut next = MarketHours::next_boundary(now, self.interval_minutes);
        for date in [now.date(), now.date() + Duration::days(1)] {
            for (at, _) in self.daily_events(date) {
                if at > now && at < next {
                    next = at;
                }
            }
        }
        next
    }

    /// Keep the last intraday tick; earlier ones were overtaken.
    fn collapse(due: Vec<Tick>) -> (Vec<Tick>, usize) {
        let intraday = due.iter().filter(|t| matches!(t, Tick::Intraday(_))).count();
        let mut seen = 0;
        let kept = due
            .into_iter()
            .filter(|t| {
                if matches!(t, Tick::Intraday(_)) {
                    seen += 1;
                    seen == intraday
                } else {
                    true
                }
            })
            .collect();
        (kept, intraday.saturating_sub(1))
    }

    /// Loop until `max_ticks` ticks have run (forever with `None`). A
    /// failing handler is logged and counted; the loop continues.
    pub fn run<C, E>(
        &self,
        clock: &C,
        mut handler: impl FnMut(Tick) -> Result<(), E>,
        max_ticks: Option<usize>,
    ) -> ScheduleStats
    where
        C: Clock,
        E: std::fmt::Display,
    {
        let mut stats = ScheduleStats::default();
        let mut last = self.market.local(clock.now());
        tracing::info!(start = %last, interval_minutes = self.interval_minutes, "scheduler started");
        loop {
            let wake = self.next_wakeup(last);
            clock.sleep_until(self.market.to_utc(wake));
            let now = self.market.local(clock.now());
            let (ticks, skipped) = Self::collapse(self.plan(last, now));
            last = now;
            if skipped > 0 {
                tracing::warn!(skipped, "intraday ticks overlapped a running tick, skipping");
                stats.skipped += skipped;
            }
            for tick in ticks {
                if max_ticks.is_some_and(|max| stats.ticks_run + stats.failed >= max) {
                    return stats;
                }
                tracing::info!(tick = tick.label(), "tick");
                match handler(tick) {
                    Ok(()) => stats.ticks_run += 1,
                    Err(e) => {
                        tracing::error!(tick = tick.label(), error = %e, "tick failed");
                        stats.failed += 1;
                    }
                }
            }
            if max_ticks.is_some_and(|max| stats.ticks_run + stats.failed >= max) {
                return stats;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn scheduler() -> Scheduler {
        Scheduler::from_config(&PipelineConfig::default()).unwrap()
    }

    fn local(day: u32, h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, day)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn intraday_ticks_only_in_session() {
        // 2024-01-02 is a Tuesday
        let ticks = scheduler().plan(local(2, 9, 0), local(2, 10, 0));
        assert_eq!(
            ticks,
            vec![
                Tick::Intraday(local(2, 9, 30)),
                Tick::Intraday(local(2, 9, 45)),
                Tick::Intraday(local(2, 10, 0)),
            ]
        );
        assert!(scheduler().plan(local(2, 16, 1), local(2, 16, 29)).is_empty());
    }

    #[test]
    fn daily_events_on_trading_days() {
        let ticks = scheduler().plan(local(2, 16, 10), local(3, 6, 5));
        assert_eq!(
            ticks,
            vec![
                Tick::EndOfDay(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
                Tick::Backfill(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()),
            ]
        );
    }

    #[test]
    fn monday_backfills_friday_and_reports() {
        // 2024-01-08 is a Monday
        let ticks = scheduler().plan(local(8, 5, 0), local(8, 7, 0));
        assert_eq!(
            ticks,
            vec![
                Tick::Backfill(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap()),
                Tick::WeeklyReport(NaiveDate::from_ymd_opt(2024, 1, 8).unwrap()),
            ]
        );
    }

    #[test]
    fn weekend_is_quiet() {
        assert!(scheduler().plan(local(6, 0, 0), local(7, 23, 59)).is_empty());
    }

    #[test]
    fn next_wakeup_picks_earliest_event() {
        let s = scheduler();
        assert_eq!(s.next_wakeup(local(2, 9, 31)), local(2, 9, 45));
        assert_eq!(s.next_wakeup(local(2, 16, 20)), local(2, 16, 30));
        assert_eq!(s.next_wakeup(local(2, 5, 55)), local(2, 6, 0));
    }

    #[test]
    fn slow_tick_skips_overtaken_boundaries() {
        let s = scheduler();
        // 09:40 New York = 14:40 UTC on Tuesday 2024-01-02
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 14, 40, 0).unwrap());
        let mut seen = Vec::new();
        let stats = s.run(
            &clock,
            |tick| {
                seen.push(tick);
                // first tick takes 40 minutes
                if seen.len() == 1 {
                    clock.advance(Duration::minutes(40));
                }
                Ok::<(), String>(())
            },
            Some(2),
        );
        assert_eq!(stats.ticks_run, 2);
        // 10:00 passed while the first tick ran
        assert_eq!(stats.skipped, 1);
        assert_eq!(seen, vec![Tick::Intraday(local(2, 9, 45)), Tick::Intraday(local(2, 10, 15))]);
    }

    #[test]
    fn failing_handler_is_counted() {
        let s = scheduler();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 2, 14, 40, 0).unwrap());
        let stats = s.run(&clock, |_| Err("boom"), Some(3));
        assert_eq!(stats.failed, 3);
        assert_eq!(stats.ticks_run, 0);
    }
}
