use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::domain::market::candle::Candlestick;
use crate::domain::market::reaction::ReactionKind;

/// Confirmed breaks after which a level stops being tracked.
const MAX_BREAKS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelKind {
    Support,
    Resistance,
}

impl LevelKind {
    pub fn flipped(&self) -> LevelKind {
        match self {
            LevelKind::Support => LevelKind::Resistance,
            LevelKind::Resistance => LevelKind::Support,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LevelKind::Support => 0,
            LevelKind::Resistance => 1,
        }
    }

    fn from_u8(v: u8) -> LevelKind {
        if v == 0 {
            LevelKind::Support
        } else {
            LevelKind::Resistance
        }
    }
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelKind::Support => write!(f, "support"),
            LevelKind::Resistance => write!(f, "resistance"),
        }
    }
}

/// A support/resistance horizon derived from a prior session extremum.
///
/// The mutable lifecycle state lives in atomics: the owning tracker writes
/// while reaction classifiers read concurrently, and a coarse lock on the
/// hot candle path is unnecessary.
#[derive(Debug)]
pub struct Level {
    pub market: String,
    pub price: f64,
    kind: AtomicU8,
    reversals: AtomicU32,
    breaks: AtomicU32,
    breaking: AtomicBool,
    invalidated: AtomicBool,
}

impl Level {
    /// Creates a level at `price`. The triggering candle decides polarity:
    /// a close below the price means the level caps from above.
    pub fn new(market: impl Into<String>, price: f64, candle: &Candlestick) -> Self {
        let kind = if candle.close < price {
            LevelKind::Resistance
        } else {
            LevelKind::Support
        };
        Self {
            market: market.into(),
            price,
            kind: AtomicU8::new(kind.as_u8()),
            reversals: AtomicU32::new(0),
            breaks: AtomicU32::new(0),
            breaking: AtomicBool::new(false),
            invalidated: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> LevelKind {
        LevelKind::from_u8(self.kind.load(Ordering::SeqCst))
    }

    pub fn reversals(&self) -> u32 {
        self.reversals.load(Ordering::SeqCst)
    }

    pub fn breaks(&self) -> u32 {
        self.breaks.load(Ordering::SeqCst)
    }

    pub fn is_breaking(&self) -> bool {
        self.breaking.load(Ordering::SeqCst)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    /// Folds a classified reaction into the lifecycle. A `Break` only arms
    /// the pending-break flag; confirmation waits for a candle close on the
    /// far side (see [`Level::update`]).
    pub fn apply_reaction(&self, reaction: ReactionKind) {
        if self.is_invalidated() {
            return;
        }
        match reaction {
            ReactionKind::Chop => {}
            ReactionKind::Reversal => {
                self.reversals.fetch_add(1, Ordering::SeqCst);
            }
            ReactionKind::Break => {
                self.breaking.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Confirms or rejects a pending break against a candle close. On
    /// confirmation the polarity flips, reversals reset, and the level is
    /// invalidated once it has broken three times.
    pub fn update(&self, candle: &Candlestick) {
        if self.is_invalidated() || !self.is_breaking() {
            return;
        }

        let confirmed = match self.kind() {
            LevelKind::Support => candle.close < self.price,
            LevelKind::Resistance => candle.close > self.price,
        };
        if !confirmed {
            return;
        }

        let breaks = self.breaks.fetch_add(1, Ordering::SeqCst) + 1;
        self.reversals.store(0, Ordering::SeqCst);
        self.kind
            .store(self.kind().flipped().as_u8(), Ordering::SeqCst);
        self.breaking.store(false, Ordering::SeqCst);

        if breaks >= MAX_BREAKS {
            self.invalidated.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::timeframe::Timeframe;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;

    fn closing_at(close: f64) -> Candlestick {
        let date = New_York.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();
        Candlestick::new("^NDX", Timeframe::FiveMin, close, close + 1.0, close - 1.0, close, 10.0, date)
    }

    #[test]
    fn test_polarity_from_trigger_candle() {
        assert_eq!(Level::new("^NDX", 12.0, &closing_at(11.0)).kind(), LevelKind::Resistance);
        assert_eq!(Level::new("^NDX", 12.0, &closing_at(12.0)).kind(), LevelKind::Support);
        assert_eq!(Level::new("^NDX", 12.0, &closing_at(13.0)).kind(), LevelKind::Support);
    }

    #[test]
    fn test_reversal_counts_and_chop_noop() {
        let level = Level::new("^NDX", 12.0, &closing_at(13.0));
        level.apply_reaction(ReactionKind::Reversal);
        level.apply_reaction(ReactionKind::Chop);
        level.apply_reaction(ReactionKind::Reversal);
        assert_eq!(level.reversals(), 2);
        assert_eq!(level.breaks(), 0);
        assert!(!level.is_breaking());
    }

    #[test]
    fn test_unconfirmed_break_keeps_polarity() {
        let level = Level::new("^NDX", 12.0, &closing_at(13.0));
        level.apply_reaction(ReactionKind::Break);
        assert!(level.is_breaking());
        // Support holds: close stays above the price.
        level.update(&closing_at(12.5));
        assert_eq!(level.breaks(), 0);
        assert_eq!(level.kind(), LevelKind::Support);
        assert!(level.is_breaking());
    }

    #[test]
    fn test_three_confirmed_breaks_invalidate() {
        let level = Level::new("^NDX", 12.0, &closing_at(11.0));
        assert_eq!(level.kind(), LevelKind::Resistance);

        level.apply_reaction(ReactionKind::Break);
        level.update(&closing_at(13.0));
        assert_eq!(level.breaks(), 1);
        assert_eq!(level.kind(), LevelKind::Support);

        level.apply_reaction(ReactionKind::Break);
        level.update(&closing_at(5.0));
        assert_eq!(level.breaks(), 2);
        assert_eq!(level.kind(), LevelKind::Resistance);

        level.apply_reaction(ReactionKind::Break);
        level.update(&closing_at(13.0));
        assert_eq!(level.breaks(), 3);
        assert_eq!(level.kind(), LevelKind::Support);
        assert!(level.is_invalidated());
    }

    #[test]
    fn test_invalidated_level_is_inert() {
        let level = Level::new("^NDX", 12.0, &closing_at(11.0));
        for close in [13.0, 5.0, 13.0] {
            level.apply_reaction(ReactionKind::Break);
            level.update(&closing_at(close));
        }
        assert!(level.is_invalidated());

        level.apply_reaction(ReactionKind::Reversal);
        level.apply_reaction(ReactionKind::Break);
        level.update(&closing_at(5.0));
        assert_eq!(level.reversals(), 0);
        assert_eq!(level.breaks(), 3);
        assert_eq!(level.kind(), LevelKind::Support);
    }

    #[test]
    fn test_break_reset_clears_reversals() {
        let level = Level::new("^NDX", 12.0, &closing_at(13.0));
        level.apply_reaction(ReactionKind::Reversal);
        level.apply_reaction(ReactionKind::Reversal);
        level.apply_reaction(ReactionKind::Break);
        level.update(&closing_at(11.0));
        assert_eq!(level.reversals(), 0);
        assert_eq!(level.breaks(), 1);
    }
}
