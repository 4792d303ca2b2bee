use chrono::DateTime;
use chrono_tz::Tz;
use std::fmt;
use tokio::sync::mpsc;

use crate::domain::market::timeframe::Timeframe;

/// Relative volume increase treated as a spike.
const VOLUME_SPIKE_THRESHOLD: f64 = 0.35;
/// Minimum body fraction for a marubozu, and for an engulfing body.
const FULL_BODY_FRACTION: f64 = 0.7;
const ENGULFING_BODY_FRACTION: f64 = 0.5;
/// Wick fractions bounding pinbars and dojis.
const LONG_WICK_FRACTION: f64 = 0.5;
const SHORT_WICK_FRACTION: f64 = 0.2;
const DOJI_BODY_FRACTION: f64 = 0.3;
const DOJI_WICK_FRACTION: f64 = 0.3;

/// End-to-end processing acknowledgment sent back on a candle's status
/// channel once every subscriber-side update has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Processed,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentiment {
    Bullish,
    Bearish,
    Neutral,
}

impl fmt::Display for Sentiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sentiment::Bullish => write!(f, "bullish"),
            Sentiment::Bearish => write!(f, "bearish"),
            Sentiment::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleKind {
    Marubozu,
    Pinbar,
    Doji,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Momentum {
    Low,
    Medium,
    High,
}

/// A single OHLCV bar flowing through the pipeline.
///
/// The optional `status` sender is attached by the dispatcher per
/// subscriber; the owning tracker acks exactly once after its updates.
#[derive(Debug, Clone)]
pub struct Candlestick {
    pub market: String,
    pub timeframe: Timeframe,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub date: DateTime<Tz>,
    pub vwap: Option<f64>,
    pub status: Option<mpsc::Sender<ProcessStatus>>,
}

impl Candlestick {
    pub fn new(
        market: impl Into<String>,
        timeframe: Timeframe,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
        date: DateTime<Tz>,
    ) -> Self {
        Self {
            market: market.into(),
            timeframe,
            open,
            high,
            low,
            close,
            volume,
            date,
            vwap: None,
            status: None,
        }
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    /// Typical price used by the VWAP accumulator.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    pub fn sentiment(&self) -> Sentiment {
        let delta = self.close - self.open;
        if delta > 0.0 {
            Sentiment::Bullish
        } else if delta < 0.0 {
            Sentiment::Bearish
        } else {
            Sentiment::Neutral
        }
    }

    pub fn kind(&self) -> CandleKind {
        let range = self.range();
        if range <= 0.0 {
            return CandleKind::Unknown;
        }

        let body = self.body() / range;
        let upper = self.upper_wick() / range;
        let lower = self.lower_wick() / range;

        if (upper >= LONG_WICK_FRACTION && lower <= SHORT_WICK_FRACTION)
            || (lower >= LONG_WICK_FRACTION && upper <= SHORT_WICK_FRACTION)
        {
            return CandleKind::Pinbar;
        }
        if body <= DOJI_BODY_FRACTION
            && upper >= DOJI_WICK_FRACTION
            && lower >= DOJI_WICK_FRACTION
        {
            return CandleKind::Doji;
        }
        if body >= FULL_BODY_FRACTION {
            return CandleKind::Marubozu;
        }
        CandleKind::Unknown
    }

    /// True when volume expanded at least 35% over the prior candle.
    pub fn volume_spike(&self, prev: &Candlestick) -> bool {
        if self.volume <= 0.0 || prev.volume <= 0.0 {
            return false;
        }
        (self.volume - prev.volume) / prev.volume >= VOLUME_SPIKE_THRESHOLD
    }

    pub fn momentum(&self, prev: &Candlestick) -> Momentum {
        if self.volume_spike(prev) {
            Momentum::High
        } else if self.volume > prev.volume {
            Momentum::Medium
        } else {
            Momentum::Low
        }
    }

    /// Detects an engulfing candle: sentiment flip, the current body fully
    /// covering the prior body, and a body at least half the current range.
    /// Dojis never engulf.
    pub fn engulfs(&self, prev: &Candlestick) -> bool {
        if self.kind() == CandleKind::Doji {
            return false;
        }
        let range = self.range();
        if range <= 0.0 || self.body() / range < ENGULFING_BODY_FRACTION {
            return false;
        }

        match (prev.sentiment(), self.sentiment()) {
            (Sentiment::Bullish, Sentiment::Bearish) => {
                self.open >= prev.close && self.close <= prev.open
            }
            (Sentiment::Bearish, Sentiment::Bullish) => {
                self.open <= prev.close && self.close >= prev.open
            }
            _ => false,
        }
    }

    /// Derives classification metadata, using `prev` for the volume-relative
    /// fields when available.
    pub fn metadata(&self, prev: Option<&Candlestick>) -> CandleMetadata {
        let (momentum, engulfing) = match prev {
            Some(p) => (self.momentum(p), self.engulfs(p)),
            None => (Momentum::Low, false),
        };
        CandleMetadata {
            kind: self.kind(),
            sentiment: self.sentiment(),
            momentum,
            volume: self.volume,
            engulfing,
            high: self.high,
            low: self.low,
            date: self.date,
        }
    }

    /// Sends the processing ack, if a status channel is attached. The
    /// channel has capacity one and the ack is sent at most once, so a full
    /// channel means a duplicate ack and is ignored.
    pub fn ack(&self, status: ProcessStatus) {
        if let Some(tx) = &self.status {
            let _ = tx.try_send(status);
        }
    }
}

/// Classification derived from a candle and its predecessor.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleMetadata {
    pub kind: CandleKind,
    pub sentiment: Sentiment,
    pub momentum: Momentum,
    pub volume: f64,
    pub engulfing: bool,
    pub high: f64,
    pub low: f64,
    pub date: DateTime<Tz>,
}
