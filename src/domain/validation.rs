//! Centralized market-data integrity checks.
//!
//! Rejects data that is physically impossible before it can poison the
//! rolling state: non-positive prices, inverted ranges, bodies outside
//! the range, negative volume.

use tracing::warn;

use crate::domain::market::candle::Candlestick;
use crate::domain::ports::CandleRecord;

pub struct StrictCandleValidator;

impl StrictCandleValidator {
    /// Validates a pipeline candle. Returns true if valid.
    pub fn validate_candle(candle: &Candlestick) -> bool {
        Self::validate_ohlcv(
            &candle.market,
            candle.open,
            candle.high,
            candle.low,
            candle.close,
            candle.volume,
        )
    }

    /// Validates a raw vendor/replay record. Returns true if valid.
    pub fn validate_record(market: &str, record: &CandleRecord) -> bool {
        Self::validate_ohlcv(
            market,
            record.open,
            record.high,
            record.low,
            record.close,
            record.volume,
        )
    }

    fn validate_ohlcv(
        market: &str,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> bool {
        let prices = [open, high, low, close];
        if prices.iter().any(|p| !p.is_finite() || *p <= 0.0) {
            warn!(
                market,
                "validation failed: non-positive or non-finite price component"
            );
            return false;
        }
        if low > high {
            warn!(market, low, high, "validation failed: low above high");
            return false;
        }
        if open > high || open < low || close > high || close < low {
            warn!(
                market,
                open, close, "validation failed: body outside the range"
            );
            return false;
        }
        if !volume.is_finite() || volume < 0.0 {
            warn!(market, volume, "validation failed: bad volume");
            return false;
        }
        true
    }
}
