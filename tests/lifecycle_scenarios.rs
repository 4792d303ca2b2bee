//! Concrete lifecycle scenarios exercised through the public API: level
//! polarity flips, reaction tables, VWAP accumulation, displacement
//! detection, and session idempotence.

use std::sync::Arc;

use chrono::TimeZone;
use chrono_tz::America::New_York;
use chrono_tz::Tz;

use marketflow::application::snapshots::{CandleSnapshot, SessionSnapshot, VwapSnapshot};
use marketflow::application::vwap_engine::VwapEngine;
use marketflow::domain::market::candle::{Candlestick, Sentiment};
use marketflow::domain::market::level::{Level, LevelKind};
use marketflow::domain::market::reaction::{self, Focus, ReactionKind};
use marketflow::domain::market::timeframe::Timeframe;

fn ny(h: u32, mi: u32) -> chrono::DateTime<Tz> {
    New_York.with_ymd_and_hms(2024, 3, 4, h, mi, 0).unwrap()
}

fn candle(mi: u32, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candlestick {
    Candlestick::new("^NDX", Timeframe::FiveMin, open, high, low, close, volume, ny(9, mi))
}

fn closing_at(close: f64) -> Candlestick {
    candle(30, close, close + 1.0, close - 1.0, close, 10.0)
}

#[test]
fn level_breaks_three_times_then_dies() {
    // Created from a candle closing below 12: resistance overhead.
    let level = Level::new("^NDX", 12.0, &closing_at(11.0));
    assert_eq!(level.kind(), LevelKind::Resistance);

    let script = [
        (13.0, 1, LevelKind::Support),
        (5.0, 2, LevelKind::Resistance),
        (13.0, 3, LevelKind::Support),
    ];
    for (close, breaks, kind) in script {
        level.apply_reaction(ReactionKind::Break);
        level.update(&closing_at(close));
        assert_eq!(level.breaks(), breaks);
        assert_eq!(level.kind(), kind);
    }
    assert!(level.is_invalidated());

    // Re-applying a chop is a no-op on every counter.
    let reversals = level.reversals();
    let breaks = level.breaks();
    level.apply_reaction(ReactionKind::Chop);
    level.apply_reaction(ReactionKind::Chop);
    assert_eq!(level.reversals(), reversals);
    assert_eq!(level.breaks(), breaks);
}

#[test]
fn support_window_classification_table() {
    let focus = || Focus::Level(Arc::new(Level::new("^NDX", 12.0, &closing_at(13.0))));

    // Opening below the support matches no support rule: chop.
    let window: Vec<Candlestick> = [11.0, 13.0, 14.0, 15.0]
        .iter()
        .enumerate()
        .map(|(i, c)| candle(5 * i as u32, *c, c + 1.0, c - 1.0, *c, 10.0))
        .collect();
    let r = reaction::classify(&window, focus()).unwrap();
    assert_eq!(r.reaction, ReactionKind::Chop);

    // Hold then three closes below: break.
    let window: Vec<Candlestick> = [13.0, 10.0, 9.0, 8.0]
        .iter()
        .enumerate()
        .map(|(i, c)| candle(5 * i as u32, *c, c + 1.0, c - 1.0, *c, 10.0))
        .collect();
    let r = reaction::classify(&window, focus()).unwrap();
    assert_eq!(r.reaction, ReactionKind::Break);

    // Determinism: the same window classifies identically every time.
    let again = reaction::classify(&window, focus()).unwrap();
    assert_eq!(again.reaction, r.reaction);
    assert_eq!(again.price_movement, r.price_movement);
}

#[test]
fn vwap_accumulates_typical_price_volume() {
    let snapshot = Arc::new(VwapSnapshot::with_default_capacity(Timeframe::FiveMin));
    let engine = VwapEngine::new("^NDX", Timeframe::FiveMin, Arc::clone(&snapshot));

    let mut first = candle(30, 8.0, 9.0, 3.0, 8.0, 2.0);
    let e1 = engine.update(&mut first).unwrap();
    assert!((e1.value - 6.6667).abs() < 1e-4);

    let mut second = candle(35, 9.0, 10.0, 4.0, 9.0, 3.0);
    let e2 = engine.update(&mut second).unwrap();
    assert!((e2.value - 7.2667).abs() < 1e-4);

    // add then last round-trips; at() only matches the exact date.
    assert_eq!(snapshot.last().unwrap(), e2);
    assert_eq!(snapshot.at(second.date).unwrap(), e2);
    assert!(snapshot.at(ny(23, 59)).is_none());
}

#[test]
fn bullish_engulfing_detected() {
    let prev = candle(25, 5.0, 10.0, 1.0, 2.0, 10.0);
    let cur = candle(30, 2.0, 16.0, 1.0, 15.0, 12.0);
    let metadata = cur.metadata(Some(&prev));
    assert!(metadata.engulfing);
    assert_eq!(metadata.sentiment, Sentiment::Bullish);
}

#[test]
fn displacement_gap_becomes_imbalance() {
    let snapshot = CandleSnapshot::with_default_capacity(Timeframe::FiveMin);
    snapshot.update(candle(30, 14.0, 18.0, 10.0, 14.0, 2.0)).unwrap();
    snapshot.update(candle(35, 17.0, 25.0, 16.0, 24.0, 7.0)).unwrap();
    snapshot.update(candle(40, 24.0, 28.0, 23.0, 27.0, 2.0)).unwrap();

    let imbalance = snapshot.detect_imbalance().expect("gap detected");
    assert_eq!(imbalance.sentiment, Sentiment::Bullish);
    assert_eq!(imbalance.high, 23.0);
    assert_eq!(imbalance.low, 18.0);
    assert_eq!(imbalance.midpoint, 20.5);
    assert_eq!(imbalance.date, ny(9, 35));

    // Purge on the first close beyond the far edge, invalidate on the
    // second, strictly in that order.
    assert!(!imbalance.is_purged());
    imbalance.update(&candle(45, 18.0, 19.0, 16.0, 17.0, 3.0));
    assert!(imbalance.is_purged() && !imbalance.is_invalidated());
    imbalance.update(&candle(50, 17.0, 18.0, 15.0, 16.0, 3.0));
    assert!(imbalance.is_invalidated());
}

#[test]
fn session_generation_is_idempotent() {
    let sessions = SessionSnapshot::with_default_capacity();
    sessions.generate_new_sessions(ny(9, 0)).unwrap();
    let count = sessions.len();

    sessions.generate_new_sessions(ny(9, 0)).unwrap();
    sessions.generate_new_sessions(ny(9, 30)).unwrap();
    assert_eq!(sessions.len(), count);
}
