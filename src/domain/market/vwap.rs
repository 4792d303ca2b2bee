use chrono::DateTime;
use chrono_tz::Tz;

/// One VWAP observation, recorded per candle of the matching timeframe.
#[derive(Debug, Clone, PartialEq)]
pub struct VwapEntry {
    pub value: f64,
    pub date: DateTime<Tz>,
}

impl VwapEntry {
    pub fn new(value: f64, date: DateTime<Tz>) -> Self {
        Self { value, date }
    }
}
