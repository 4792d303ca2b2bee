use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::dispatcher::CandleDispatcher;
use crate::application::snapshots::candles::DEFAULT_CANDLE_CAPACITY;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::ports::MarketDataClient;

/// Seeds tracker state with recent history before live polling starts.
///
/// Fetches one snapshot-depth of bars per (market, timeframe) and pushes
/// them through the regular fan-out path, oldest first, so snapshots,
/// sessions, and VWAPs are primed exactly as live data would prime them.
pub struct WarmupService {
    client: Arc<dyn MarketDataClient>,
    dispatcher: Arc<CandleDispatcher>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct WarmupSummary {
    pub candles_delivered: usize,
    pub fetches_failed: usize,
}

impl WarmupService {
    pub fn new(client: Arc<dyn MarketDataClient>, dispatcher: Arc<CandleDispatcher>) -> Self {
        Self { client, dispatcher }
    }

    pub async fn warm_up(&self, markets: &[String], now: DateTime<Tz>) -> Result<WarmupSummary> {
        let mut summary = WarmupSummary::default();

        for market in markets {
            for timeframe in Timeframe::all() {
                let lookback =
                    ChronoDuration::seconds(timeframe.seconds() * DEFAULT_CANDLE_CAPACITY as i64);
                let records = match self
                    .client
                    .fetch_index_intraday_historical(market, timeframe, now - lookback, None)
                    .await
                {
                    Ok(records) => records,
                    Err(e) => {
                        // Missing history is not fatal; the scheduled
                        // fetch jobs will fill the gap.
                        warn!(market, %timeframe, "warmup fetch failed: {e:#}");
                        summary.fetches_failed += 1;
                        continue;
                    }
                };

                for record in records {
                    let candle = match record.into_candle(market, timeframe) {
                        Ok(candle) => candle,
                        Err(e) => {
                            warn!(market, "skipping warmup record: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = self.dispatcher.notify_subscribers(candle).await {
                        warn!(market, %timeframe, "warmup delivery failed: {e}");
                        break;
                    }
                    summary.candles_delivered += 1;
                }
            }
        }

        info!(
            delivered = summary.candles_delivered,
            failed = summary.fetches_failed,
            "warmup finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::candle::{Candlestick, ProcessStatus};
    use crate::domain::ports::CandleRecord;
    use crate::infrastructure::mock::ScriptedMarketData;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn record(date: &str) -> CandleRecord {
        CandleRecord {
            open: 10.0,
            close: 11.0,
            high: 12.0,
            low: 9.0,
            volume: 100.0,
            date: date.to_string(),
        }
    }

    #[tokio::test]
    async fn test_warmup_delivers_each_batch() {
        let (dispatcher, _catch_up) = CandleDispatcher::new();
        let dispatcher = Arc::new(dispatcher);

        let acks = Arc::new(AtomicUsize::new(0));
        let acks_counter = Arc::clone(&acks);
        let (tx, mut rx) = mpsc::channel::<Candlestick>(8);
        tokio::spawn(async move {
            while let Some(candle) = rx.recv().await {
                acks_counter.fetch_add(1, Ordering::SeqCst);
                candle.ack(ProcessStatus::Processed);
            }
        });
        dispatcher.subscribe("^NDX", tx).await;

        // One batch per timeframe.
        let client = Arc::new(ScriptedMarketData::new(vec![
            vec![record("2024-03-04 09:30:00"), record("2024-03-04 09:31:00")],
            vec![record("2024-03-04 09:30:00")],
            vec![],
        ]));

        let service = WarmupService::new(client.clone(), dispatcher);
        let now = New_York.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let summary = service
            .warm_up(&["^NDX".to_string()], now)
            .await
            .unwrap();

        assert_eq!(summary.candles_delivered, 3);
        assert_eq!(summary.fetches_failed, 0);
        assert_eq!(acks.load(Ordering::SeqCst), 3);
        assert_eq!(client.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_warmup_without_history_is_clean() {
        let (dispatcher, _catch_up) = CandleDispatcher::new();
        let service =
            WarmupService::new(Arc::new(ScriptedMarketData::empty()), Arc::new(dispatcher));
        let now = New_York.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let summary = service
            .warm_up(&["^NDX".to_string()], now)
            .await
            .unwrap();
        assert_eq!(summary, WarmupSummary::default());
    }
}
