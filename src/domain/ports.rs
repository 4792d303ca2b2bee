//! Ports to external collaborators. The pipeline depends on these traits
//! only; concrete implementations live under `infrastructure`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::MarketDataError;
use crate::domain::market::candle::Candlestick;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::signals::MarketSkew;

/// Wire layout of one OHLCV record as served by the vendor and by replay
/// files. `date` is `YYYY-MM-DD HH:MM:SS` on the New-York clock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleRecord {
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub date: String,
}

const RECORD_DATE_LAYOUT: &str = "%Y-%m-%d %H:%M:%S";

impl CandleRecord {
    /// Converts the record into a pipeline candle, localizing the date.
    pub fn into_candle(
        self,
        market: &str,
        timeframe: Timeframe,
    ) -> Result<Candlestick, MarketDataError> {
        let date = parse_record_date(&self.date).map_err(|reason| {
            MarketDataError::MalformedRecord {
                market: market.to_string(),
                reason,
            }
        })?;
        Ok(Candlestick::new(
            market,
            timeframe,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            date,
        ))
    }
}

pub fn parse_record_date(raw: &str) -> Result<DateTime<Tz>, String> {
    let naive = NaiveDateTime::parse_from_str(raw, RECORD_DATE_LAYOUT)
        .map_err(|e| format!("bad date '{raw}': {e}"))?;
    naive
        .and_local_timezone(New_York)
        .earliest()
        .ok_or_else(|| format!("date '{raw}' does not exist in New York"))
}

/// Upstream vendor serving intraday OHLCV history.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    /// Fetches bars for `(market, timeframe)` from `from` through `to`;
    /// `None` for `to` means now.
    async fn fetch_index_intraday_historical(
        &self,
        market: &str,
        timeframe: Timeframe,
        from: DateTime<Tz>,
        to: Option<DateTime<Tz>>,
    ) -> Result<Vec<CandleRecord>>;
}

/// Position-manager view of the current aggregate bias per market.
#[async_trait]
pub trait SkewProvider: Send + Sync {
    async fn market_skew(&self, market: &str) -> MarketSkew;
}

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
/// A job factory: each tick builds and awaits a fresh future.
pub type Job = Arc<dyn Fn() -> JobFuture + Send + Sync>;

/// Scheduling capability. Registration is idempotent per name: registering
/// an already-known job returns the original id without a second task.
pub trait JobScheduler: Send + Sync {
    fn register(
        &self,
        name: &str,
        interval: Duration,
        start_at: DateTime<Tz>,
        job: Job,
    ) -> Uuid;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_record_date_parses_to_new_york() {
        let dt = parse_record_date("2024-03-04 09:30:00").unwrap();
        assert_eq!(dt.hour(), 9);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.day(), 4);
        assert_eq!(dt.timezone(), New_York);
    }

    #[test]
    fn test_record_date_rejects_garbage() {
        assert!(parse_record_date("03/04/2024 09:30").is_err());
        assert!(parse_record_date("").is_err());
    }

    #[test]
    fn test_record_into_candle() {
        let record = CandleRecord {
            open: 10.0,
            close: 11.0,
            high: 12.0,
            low: 9.0,
            volume: 1000.0,
            date: "2024-03-04 09:30:00".to_string(),
        };
        let candle = record.into_candle("^NDX", Timeframe::FiveMin).unwrap();
        assert_eq!(candle.market, "^NDX");
        assert_eq!(candle.timeframe, Timeframe::FiveMin);
        assert_eq!(candle.high, 12.0);
        assert!(candle.vwap.is_none());
    }
}
