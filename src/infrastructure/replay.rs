use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::dispatcher::CandleDispatcher;
use crate::domain::market::candle::Candlestick;
use crate::domain::market::session;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::ports::CandleRecord;
use crate::domain::signals::CatchUpSignal;
use crate::domain::validation::StrictCandleValidator;

/// On-disk replay layout: one market, optional per-timeframe record
/// arrays. Missing or empty arrays are skipped.
#[derive(Debug, Deserialize)]
pub struct ReplayFile {
    pub market: String,
    #[serde(rename = "1m", default)]
    pub one_min: Vec<CandleRecord>,
    #[serde(rename = "5m", default)]
    pub five_min: Vec<CandleRecord>,
    #[serde(rename = "1H", default)]
    pub one_hour: Vec<CandleRecord>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub candles_delivered: usize,
    pub catch_up_signals: usize,
}

/// Feeds recorded candles through the live fan-out path, in strict
/// `(date, timeframe)` order, waiting on every subscriber ack exactly as
/// the dispatcher does for live data.
pub struct ReplayDriver {
    dispatcher: Arc<CandleDispatcher>,
}

impl ReplayDriver {
    pub fn new(dispatcher: Arc<CandleDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn run_file(&self, path: &Path) -> Result<ReplaySummary> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading replay file {}", path.display()))?;
        let file: ReplayFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing replay file {}", path.display()))?;
        self.run(file).await
    }

    pub async fn run(&self, file: ReplayFile) -> Result<ReplaySummary> {
        let mut candles = Vec::new();
        for (timeframe, records) in [
            (Timeframe::OneMin, file.one_min),
            (Timeframe::FiveMin, file.five_min),
            (Timeframe::OneHour, file.one_hour),
        ] {
            for record in records {
                if !StrictCandleValidator::validate_record(&file.market, &record) {
                    continue;
                }
                match record.into_candle(&file.market, timeframe) {
                    Ok(candle) => candles.push(candle),
                    Err(e) => warn!(market = %file.market, "skipping replay record: {e}"),
                }
            }
        }
        candles.sort_by(|a, b| a.date.cmp(&b.date).then(a.timeframe.cmp(&b.timeframe)));

        let mut summary = ReplaySummary::default();
        let Some(first) = candles.first() else {
            warn!(market = %file.market, "replay file holds no candles");
            return Ok(summary);
        };

        // The session active at the start of the replay; the first candle
        // dated past its close triggers a single catch-up signal.
        let mut session_close = session::current_session(first.date)?.map(|s| s.close);

        info!(
            market = %file.market,
            candles = candles.len(),
            "starting historical replay"
        );
        for candle in candles {
            if let Some(close) = session_close
                && candle.date > close
            {
                self.dispatcher.send_catch_up_signal(CatchUpSignal {
                    market: file.market.clone(),
                    timeframe: candle.timeframe,
                    start: close,
                });
                summary.catch_up_signals += 1;
                session_close = None;
            }

            self.deliver(candle).await?;
            summary.candles_delivered += 1;
        }

        info!(
            market = %file.market,
            delivered = summary.candles_delivered,
            "replay finished"
        );
        Ok(summary)
    }

    async fn deliver(&self, candle: Candlestick) -> Result<()> {
        self.dispatcher
            .notify_subscribers(candle)
            .await
            .context("replay delivery failed")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::candle::ProcessStatus;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    fn record(date: &str, close: f64) -> CandleRecord {
        CandleRecord {
            open: close - 1.0,
            close,
            high: close + 1.0,
            low: close - 2.0,
            volume: 100.0,
            date: date.to_string(),
        }
    }

    fn acking_subscriber(acks: Arc<AtomicUsize>) -> mpsc::Sender<Candlestick> {
        let (tx, mut rx) = mpsc::channel::<Candlestick>(8);
        tokio::spawn(async move {
            while let Some(candle) = rx.recv().await {
                acks.fetch_add(1, Ordering::SeqCst);
                candle.ack(ProcessStatus::Processed);
            }
        });
        tx
    }

    #[tokio::test]
    async fn test_replay_acks_every_candle_and_signals_once() {
        let (dispatcher, mut catch_up_rx) = CandleDispatcher::new();
        let dispatcher = Arc::new(dispatcher);
        let acks = Arc::new(AtomicUsize::new(0));
        dispatcher
            .subscribe("^NDX", acking_subscriber(Arc::clone(&acks)))
            .await;

        // Eleven candles inside the London session, the last three dated
        // past the 12:00 close.
        let five_min: Vec<CandleRecord> = (0..11)
            .map(|i| {
                let minute = (40 + 5 * i) % 60;
                let hour = 11 + (40 + 5 * i) / 60;
                record(&format!("2024-03-04 {hour:02}:{minute:02}:00", ), 100.0 + i as f64)
            })
            .collect();

        let file = ReplayFile {
            market: "^NDX".to_string(),
            one_min: vec![],
            five_min,
            one_hour: vec![],
        };

        let driver = ReplayDriver::new(Arc::clone(&dispatcher));
        let summary = driver.run(file).await.unwrap();

        assert_eq!(summary.candles_delivered, 11);
        assert_eq!(summary.catch_up_signals, 1);
        assert_eq!(acks.load(Ordering::SeqCst), 11);

        let signal = catch_up_rx.try_recv().unwrap();
        assert_eq!(signal.market, "^NDX");
        assert!(catch_up_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replay_merges_timeframes_in_order() {
        let (dispatcher, _catch_up) = CandleDispatcher::new();
        let dispatcher = Arc::new(dispatcher);

        let (tx, mut rx) = mpsc::channel::<Candlestick>(16);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_writer = Arc::clone(&seen);
        tokio::spawn(async move {
            while let Some(candle) = rx.recv().await {
                seen_writer
                    .lock()
                    .unwrap()
                    .push((candle.date, candle.timeframe));
                candle.ack(ProcessStatus::Processed);
            }
        });
        dispatcher.subscribe("^NDX", tx).await;

        let file = ReplayFile {
            market: "^NDX".to_string(),
            one_min: vec![record("2024-03-04 09:05:00", 101.0)],
            five_min: vec![
                record("2024-03-04 09:05:00", 102.0),
                record("2024-03-04 09:00:00", 100.0),
            ],
            one_hour: vec![record("2024-03-04 09:00:00", 100.0)],
        };

        let driver = ReplayDriver::new(Arc::clone(&dispatcher));
        let summary = driver.run(file).await.unwrap();
        assert_eq!(summary.candles_delivered, 4);

        let order = seen.lock().unwrap().clone();
        let timeframes: Vec<Timeframe> = order.iter().map(|(_, tf)| *tf).collect();
        // Date ties break ascending by timeframe.
        assert_eq!(
            timeframes,
            vec![
                Timeframe::FiveMin,
                Timeframe::OneHour,
                Timeframe::OneMin,
                Timeframe::FiveMin
            ]
        );
        assert!(order.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test]
    async fn test_replay_file_parses_from_disk() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        write!(
            tmp,
            r#"{{"market":"^NDX","5m":[{{"date":"2024-03-04 09:30:00","open":1.0,"low":0.5,"high":2.5,"close":2.0,"volume":400}}]}}"#
        )
        .unwrap();

        let (dispatcher, _catch_up) = CandleDispatcher::new();
        let driver = ReplayDriver::new(Arc::new(dispatcher));
        let summary = driver.run_file(tmp.path()).await.unwrap();
        assert_eq!(summary.candles_delivered, 1);
    }

    #[tokio::test]
    async fn test_empty_replay_is_harmless() {
        let (dispatcher, _catch_up) = CandleDispatcher::new();
        let driver = ReplayDriver::new(Arc::new(dispatcher));
        let summary = driver
            .run(ReplayFile {
                market: "^NDX".to_string(),
                one_min: vec![],
                five_min: vec![],
                one_hour: vec![],
            })
            .await
            .unwrap();
        assert_eq!(summary, ReplaySummary::default());
    }
}
