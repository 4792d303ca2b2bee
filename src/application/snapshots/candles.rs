use crate::application::snapshots::ring::RingBuffer;
use crate::domain::errors::{BuildError, ContractError};
use crate::domain::market::candle::{Candlestick, Sentiment};
use crate::domain::market::imbalance::Imbalance;
use crate::domain::market::timeframe::Timeframe;

/// Default rolling depth per timeframe: three hours of 5m bars.
pub const DEFAULT_CANDLE_CAPACITY: usize = 36;

/// Middle-candle volume multiple required for a displacement.
const DISPLACEMENT_VOLUME_FACTOR: f64 = 2.0;
/// Minimum share of the outer range the gap must span.
const MIN_GAP_RATIO: f64 = 0.5;

/// Rolling store of closed candles for one (market, timeframe) stream.
#[derive(Debug)]
pub struct CandleSnapshot {
    timeframe: Timeframe,
    ring: RingBuffer<Candlestick>,
}

impl CandleSnapshot {
    pub fn new(timeframe: Timeframe, size: usize) -> Result<Self, BuildError> {
        Ok(Self {
            timeframe,
            ring: RingBuffer::new(size)?,
        })
    }

    pub fn with_default_capacity(timeframe: Timeframe) -> Self {
        Self::new(timeframe, DEFAULT_CANDLE_CAPACITY).expect("default capacity is nonzero")
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Admits a candle of the matching timeframe.
    pub fn update(&self, candle: Candlestick) -> Result<(), ContractError> {
        if candle.timeframe != self.timeframe {
            return Err(ContractError::TimeframeMismatch {
                expected: self.timeframe,
                got: candle.timeframe,
            });
        }
        self.ring.add(candle);
        Ok(())
    }

    pub fn last(&self) -> Option<Candlestick> {
        self.ring.last()
    }

    pub fn last_n(&self, n: usize) -> Vec<Candlestick> {
        self.ring.last_n(n)
    }

    /// The candle preceding the newest one, for volume-relative metadata.
    pub fn previous(&self) -> Option<Candlestick> {
        let mut pair = self.ring.last_n(2);
        if pair.len() < 2 {
            return None;
        }
        Some(pair.swap_remove(0))
    }

    /// Mean volume of the `n` candles preceding the most recent one.
    pub fn average_volume(&self, n: usize) -> Option<f64> {
        let mut window = self.ring.last_n(n + 1);
        if window.len() < 2 {
            return None;
        }
        window.pop();
        let sum: f64 = window.iter().map(|c| c.volume).sum();
        Some(sum / window.len() as f64)
    }

    /// Scans the newest three candles for a displacement gap: the outer
    /// candles must not overlap, the gap must span at least half the outer
    /// range, and the middle candle must carry at least twice the average
    /// volume of everything before it.
    pub fn detect_imbalance(&self) -> Option<Imbalance> {
        let candles = self.ring.to_vec();
        if candles.len() < 3 {
            return None;
        }

        let (first, middle, last) = (
            &candles[candles.len() - 3],
            &candles[candles.len() - 2],
            &candles[candles.len() - 1],
        );

        let prior = &candles[..candles.len() - 2];
        let prior_volume: f64 = prior.iter().map(|c| c.volume).sum::<f64>() / prior.len() as f64;
        if prior_volume <= 0.0 || middle.volume < DISPLACEMENT_VOLUME_FACTOR * prior_volume {
            return None;
        }

        if last.low > first.high {
            // Displacement leg from the middle candle's origin to the gap's
            // far edge; the gap is that leg minus the overlap with c1.
            let outer = last.low - middle.low;
            if outer <= 0.0 {
                return None;
            }
            let ratio = (last.low - first.high) / outer;
            if ratio >= MIN_GAP_RATIO {
                return Some(Imbalance::new(
                    middle.market.clone(),
                    self.timeframe,
                    last.low,
                    first.high,
                    Sentiment::Bullish,
                    ratio,
                    middle.date,
                ));
            }
        } else if last.high < first.low {
            let outer = middle.high - last.high;
            if outer <= 0.0 {
                return None;
            }
            let ratio = (first.low - last.high) / outer;
            if ratio >= MIN_GAP_RATIO {
                return Some(Imbalance::new(
                    middle.market.clone(),
                    self.timeframe,
                    first.low,
                    last.high,
                    Sentiment::Bearish,
                    ratio,
                    middle.date,
                ));
            }
        }
        None
    }
}
