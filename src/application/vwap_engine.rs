use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::application::snapshots::VwapSnapshot;
use crate::domain::errors::ContractError;
use crate::domain::market::candle::Candlestick;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::vwap::VwapEntry;

#[derive(Debug, Default)]
struct Accumulator {
    typical_price_volume: f64,
    volume: f64,
}

/// Cumulative session VWAP for one (market, timeframe) stream.
///
/// Accumulators reset daily at 17:00:10 New-York via the scheduled job,
/// strictly after the NewYork session close so the final session candle is
/// attributed to the outgoing session.
#[derive(Debug)]
pub struct VwapEngine {
    market: String,
    timeframe: Timeframe,
    snapshot: Arc<VwapSnapshot>,
    accumulator: Mutex<Accumulator>,
}

impl VwapEngine {
    pub fn new(market: impl Into<String>, timeframe: Timeframe, snapshot: Arc<VwapSnapshot>) -> Self {
        Self {
            market: market.into(),
            timeframe,
            snapshot,
            accumulator: Mutex::new(Accumulator::default()),
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Folds a candle into the accumulators, records the resulting VWAP
    /// entry, and stamps the candle. Zero cumulative volume reports 0.
    pub fn update(&self, candle: &mut Candlestick) -> Result<VwapEntry, ContractError> {
        if candle.timeframe != self.timeframe {
            return Err(ContractError::TimeframeMismatch {
                expected: self.timeframe,
                got: candle.timeframe,
            });
        }

        let value = {
            let mut acc = self.accumulator.lock().expect("vwap lock poisoned");
            acc.typical_price_volume += candle.typical_price() * candle.volume;
            acc.volume += candle.volume;
            if acc.volume > 0.0 {
                acc.typical_price_volume / acc.volume
            } else {
                0.0
            }
        };

        let entry = VwapEntry::new(value, candle.date);
        self.snapshot.add(entry.clone());
        candle.vwap = Some(value);
        Ok(entry)
    }

    /// Zeroes both accumulators for the next session day.
    pub fn reset(&self) {
        let mut acc = self.accumulator.lock().expect("vwap lock poisoned");
        acc.typical_price_volume = 0.0;
        acc.volume = 0.0;
        debug!(market = %self.market, timeframe = %self.timeframe, "vwap accumulators reset");
    }
}
