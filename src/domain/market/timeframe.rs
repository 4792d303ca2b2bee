use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Candle intervals tracked by the pipeline.
///
/// The derived ordering (1m < 5m < 1h) is load-bearing: the historical
/// replay merge sorts by `(date, timeframe)` and relies on it to break ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    OneHour,
}

impl Timeframe {
    /// Returns the interval length in seconds.
    pub fn seconds(&self) -> i64 {
        match self {
            Timeframe::OneMin => 60,
            Timeframe::FiveMin => 300,
            Timeframe::OneHour => 3600,
        }
    }

    /// Returns the interval as a std `Duration`.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds() as u64)
    }

    /// Polling cadence for the scheduled market-data fetch job: one full
    /// interval plus a five second grace so the vendor has closed the bar.
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_secs(self.seconds() as u64 + 5)
    }

    /// Vendor path segment used by the intraday history endpoint.
    pub fn vendor_str(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1min",
            Timeframe::FiveMin => "5min",
            Timeframe::OneHour => "1hour",
        }
    }

    /// All tracked timeframes in ascending order.
    pub fn all() -> [Timeframe; 3] {
        [Timeframe::OneMin, Timeframe::FiveMin, Timeframe::OneHour]
    }

    /// Truncates `now` to the current interval boundary and advances one
    /// interval, preserving the input zone.
    pub fn next_interval(&self, now: DateTime<Tz>) -> DateTime<Tz> {
        let period = self.seconds();
        let ts = now.timestamp();
        let next = ts - ts.rem_euclid(period) + period;
        now.timezone()
            .timestamp_opt(next, 0)
            .single()
            .unwrap_or(now)
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "1m" | "1min" | "onemin" => Ok(Timeframe::OneMin),
            "5m" | "5min" | "fivemin" => Ok(Timeframe::FiveMin),
            "1h" | "1hour" | "onehour" => Ok(Timeframe::OneHour),
            _ => Err(anyhow!(
                "Invalid timeframe: '{}'. Valid options: 1m, 5m, 1H",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::OneHour => "1H",
        };
        write!(f, "{}", s)
    }
}
