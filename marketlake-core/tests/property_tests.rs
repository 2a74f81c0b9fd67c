//! Property tests for core invariants.
//!
//! Uses proptest to verify:
//! 1. Resample conservation: volume is preserved, highs and lows bound the inputs
//! 2. Indicator bounds: RSI in [0, 100], Bollinger lower <= mid <= upper
//! 3. No look-ahead: appending bars never changes earlier indicator values
//! 4. Quality score stays within 0..=100

use chrono::{Duration, NaiveDate, NaiveDateTime};
use proptest::prelude::*;
use marketlake_core::analytics::quality_score;
use marketlake_core::data::{resample, roll_up_daily};
use marketlake_core::domain::{Bar, InstrumentType};
use marketlake_core::indicators::{compute_indicators, standard_indicators, Bollinger, Indicator, Rsi};

// ── Strategies (proptest) ────────────────────────────────────────────

fn session_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 2).unwrap().and_hms_opt(9, 30, 0).unwrap()
}

fn arb_price() -> impl Strategy<Value = f64> {
    (10.0..500.0_f64).prop_map(|p| (p * 100.0).round() / 100.0)
}

/// A sane bar at `slot` 5-minute steps after the open.
fn arb_bar(slot: i64) -> impl Strategy<Value = Bar> {
    (arb_price(), arb_price(), 0.0..5.0_f64, 0.0..5.0_f64, 0..1_000_000_i64).prop_map(
        move |(a, b, up, down, volume)| {
            let high = a.max(b) + up;
            let low = (a.min(b) - down).max(0.01);
            Bar {
                symbol: "PROP".into(),
                instrument_type: InstrumentType::Index,
                timestamp: session_start() + Duration::minutes(5 * slot),
                open: a,
                high,
                low,
                close: b,
                volume,
            }
        },
    )
}

fn arb_session(max_len: usize) -> impl Strategy<Value = Vec<Bar>> {
    (1..=max_len).prop_flat_map(|n| (0..n as i64).map(arb_bar).collect::<Vec<_>>())
}

fn arb_closes(min: usize, max: usize) -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(arb_price(), min..max)
}

fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| Bar {
            symbol: "PROP".into(),
            instrument_type: InstrumentType::Stock,
            timestamp: session_start() + Duration::minutes(15 * i as i64),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1000 + i as i64,
        })
        .collect()
}

// ── 1. Resample Conservation ─────────────────────────────────────────

proptest! {
    #[test]
    fn resample_preserves_volume_and_bounds(bars in arb_session(78)) {
        let out = resample(&bars, 15);
        let total_in: i64 = bars.iter().map(|b| b.volume).sum();
        let total_out: i64 = out.iter().map(|b| b.volume).sum();
        prop_assert_eq!(total_in, total_out);
        prop_assert_eq!(out.len(), (bars.len() + 2) / 3);

        for agg in &out {
            let members: Vec<&Bar> = bars
                .iter()
                .filter(|b| b.timestamp >= agg.timestamp && b.timestamp < agg.timestamp + Duration::minutes(15))
                .collect();
            let high = members.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let low = members.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            prop_assert_eq!(agg.high, high);
            prop_assert_eq!(agg.low, low);
            prop_assert_eq!(agg.open, members[0].open);
            prop_assert_eq!(agg.close, members[members.len() - 1].close);
        }
    }

    #[test]
    fn daily_roll_up_matches_resampled_roll_up(bars in arb_session(78)) {
        let direct = roll_up_daily(&bars);
        let via_resample = roll_up_daily(&resample(&bars, 15));
        prop_assert_eq!(direct.len(), 1);
        prop_assert_eq!(direct[0].volume, via_resample[0].volume);
        prop_assert_eq!(direct[0].open, via_resample[0].open);
        prop_assert_eq!(direct[0].close, via_resample[0].close);
        prop_assert_eq!(direct[0].high, via_resample[0].high);
    }
}

// ── 2. Indicator Bounds ──────────────────────────────────────────────

proptest! {
    #[test]
    fn rsi_stays_in_range(closes in arb_closes(16, 120)) {
        let bars = bars_from_closes(&closes);
        for v in Rsi::new(14).compute(&bars).into_iter().filter(|v| !v.is_nan()) {
            prop_assert!((0.0..=100.0).contains(&v), "rsi {} out of range", v);
        }
    }

    #[test]
    fn bollinger_bands_are_ordered(closes in arb_closes(20, 80)) {
        let bars = bars_from_closes(&closes);
        let upper = Bollinger::upper(20, 2.0).compute(&bars);
        let mid = Bollinger::middle(20, 2.0).compute(&bars);
        let lower = Bollinger::lower(20, 2.0).compute(&bars);
        for i in 19..bars.len() {
            prop_assert!(lower[i] <= mid[i] + 1e-9);
            prop_assert!(mid[i] <= upper[i] + 1e-9);
        }
    }
}

// ── 3. No Look-Ahead ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn appending_bars_keeps_earlier_rows(closes in arb_closes(40, 90), extra in arb_closes(1, 20)) {
        let set = standard_indicators();
        let short = bars_from_closes(&closes);
        let mut all_closes = closes.clone();
        all_closes.extend(extra);
        let long = bars_from_closes(&all_closes);

        let a = compute_indicators(&short, &set);
        let b = compute_indicators(&long, &set);
        let last = short.len() - 1;
        prop_assert_eq!(a.row(last), b.row(last));
    }
}

// ── 4. Quality Score ─────────────────────────────────────────────────

proptest! {
    #[test]
    fn quality_score_is_bounded(
        open in -10.0..500.0_f64,
        high in -10.0..500.0_f64,
        low in -10.0..500.0_f64,
        close in -10.0..500.0_f64,
        volume in -10..1000_i64,
    ) {
        let bar = Bar {
            symbol: "PROP".into(),
            instrument_type: InstrumentType::Stock,
            timestamp: session_start(),
            open,
            high,
            low,
            close,
            volume,
        };
        prop_assert!(quality_score(&bar) <= 100);
        prop_assert!(quality_score(&bar) >= 30);
    }
}
