use thiserror::Error;

use crate::domain::market::timeframe::Timeframe;

/// Errors raised while assembling components. These are fatal: the process
/// refuses to start rather than running with a half-built pipeline.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("snapshot capacity must be greater than zero")]
    ZeroCapacity,

    #[error("no markets configured")]
    NoMarkets,

    #[error("missing required collaborator: {0}")]
    MissingCollaborator(&'static str),

    #[error("invalid time layout '{layout}': {reason}")]
    TimeLayout { layout: String, reason: String },
}

/// Contract violations between components. These fail the offending
/// operation; the caller logs and continues with the next candle.
#[derive(Debug, Error)]
pub enum ContractError {
    #[error("timeframe mismatch: expected {expected}, got {got}")]
    TimeframeMismatch { expected: Timeframe, got: Timeframe },

    #[error("price data window must hold {expected} candles, got {got}")]
    WindowSize { expected: usize, got: usize },

    #[error("vwap series length {vwaps} does not match candle window {candles}")]
    SeriesLength { candles: usize, vwaps: usize },

    #[error("time {0} is not localized to America/New_York")]
    NotNewYork(String),
}

/// Back-pressure failures surfaced by the fan-out dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("subscriber '{name}' failed to ack within {timeout_ms}ms")]
    AckTimeout { name: String, timeout_ms: u64 },

    #[error("subscriber '{name}' channel closed")]
    SubscriberGone { name: String },

    #[error("catch-up queue full, dropped signal for {market} {timeframe}")]
    QueueFull { market: String, timeframe: Timeframe },
}

/// Upstream market-data failures. Transient: logged and retried on the
/// next scheduled tick, never fatal to the pipeline.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("fetch failed for {market} {timeframe}: {reason}")]
    Fetch {
        market: String,
        timeframe: Timeframe,
        reason: String,
    },

    #[error("malformed record for {market}: {reason}")]
    MalformedRecord { market: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_formatting() {
        let err = ContractError::TimeframeMismatch {
            expected: Timeframe::FiveMin,
            got: Timeframe::OneMin,
        };
        let msg = err.to_string();
        assert!(msg.contains("5m"));
        assert!(msg.contains("1m"));
    }

    #[test]
    fn test_dispatch_error_formatting() {
        let err = DispatchError::AckTimeout {
            name: "nq-tracker".to_string(),
            timeout_ms: 3000,
        };
        let msg = err.to_string();
        assert!(msg.contains("nq-tracker"));
        assert!(msg.contains("3000"));
    }
}
