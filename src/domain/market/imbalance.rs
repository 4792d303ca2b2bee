use chrono::DateTime;
use chrono_tz::Tz;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::market::candle::{Candlestick, Sentiment};
use crate::domain::market::timeframe::Timeframe;

/// A displacement gap left by a high-volume candle, acting as a future
/// reaction zone. Zone bounds are immutable; lifecycle flags are atomics
/// shared between the owning tracker and reaction readers.
#[derive(Debug)]
pub struct Imbalance {
    pub market: String,
    pub timeframe: Timeframe,
    pub high: f64,
    pub midpoint: f64,
    pub low: f64,
    pub sentiment: Sentiment,
    pub gap_ratio: f64,
    pub date: DateTime<Tz>,
    purged: AtomicBool,
    invalidated: AtomicBool,
    touching: AtomicBool,
}

impl Imbalance {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: impl Into<String>,
        timeframe: Timeframe,
        high: f64,
        low: f64,
        sentiment: Sentiment,
        gap_ratio: f64,
        date: DateTime<Tz>,
    ) -> Self {
        Self {
            market: market.into(),
            timeframe,
            high,
            midpoint: (high + low) / 2.0,
            low,
            sentiment,
            gap_ratio,
            date,
            purged: AtomicBool::new(false),
            invalidated: AtomicBool::new(false),
            touching: AtomicBool::new(false),
        }
    }

    pub fn is_purged(&self) -> bool {
        self.purged.load(Ordering::SeqCst)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::SeqCst)
    }

    pub fn is_touching(&self) -> bool {
        self.touching.load(Ordering::SeqCst)
    }

    /// Advances the purged/invalidated progression on a close beyond the
    /// zone's far edge: first such close purges, the second invalidates.
    pub fn update(&self, candle: &Candlestick) {
        if self.is_invalidated() {
            return;
        }

        let beyond = match self.sentiment {
            Sentiment::Bullish => candle.close < self.low,
            Sentiment::Bearish => candle.close > self.high,
            Sentiment::Neutral => false,
        };
        if !beyond {
            return;
        }

        if self.is_purged() {
            self.invalidated.store(true, Ordering::SeqCst);
        } else {
            self.purged.store(true, Ordering::SeqCst);
        }
    }

    /// Touch accounting: true only on the first fresh interaction with the
    /// zone. The touching latch clears once price trades clear of the zone,
    /// so a later revisit tags again.
    pub fn tagged(&self, candle: &Candlestick) -> bool {
        match self.sentiment {
            Sentiment::Bullish => {
                if candle.low > self.high {
                    self.touching.store(false, Ordering::SeqCst);
                    false
                } else {
                    !self.touching.swap(true, Ordering::SeqCst)
                }
            }
            Sentiment::Bearish => {
                if candle.high < self.low {
                    self.touching.store(false, Ordering::SeqCst);
                    false
                } else {
                    !self.touching.swap(true, Ordering::SeqCst)
                }
            }
            Sentiment::Neutral => false,
        }
    }
}
