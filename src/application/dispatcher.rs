use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::domain::errors::DispatchError;
use crate::domain::market::candle::{Candlestick, ProcessStatus};
use crate::domain::ports::MarketDataClient;
use crate::domain::signals::CatchUpSignal;

/// Queued catch-up requests before overflow sheds.
pub const CATCH_UP_CAPACITY: usize = 64;
/// Concurrent catch-up fetches.
const CATCH_UP_WORKERS: usize = 8;
/// How long a subscriber may sit on a candle before the fan-out fails.
const ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// Fans candles out to subscribers with ack-based back-pressure, and turns
/// catch-up signals into bounded history fetches that re-enter the same
/// fan-out path.
pub struct CandleDispatcher {
    subscribers: RwLock<HashMap<String, mpsc::Sender<Candlestick>>>,
    catch_up_tx: mpsc::Sender<CatchUpSignal>,
    ack_timeout: Duration,
}

impl CandleDispatcher {
    /// Returns the dispatcher plus the receiving half of its catch-up
    /// queue, which [`CandleDispatcher::run`] consumes.
    pub fn new() -> (Self, mpsc::Receiver<CatchUpSignal>) {
        let (catch_up_tx, catch_up_rx) = mpsc::channel(CATCH_UP_CAPACITY);
        (
            Self {
                subscribers: RwLock::new(HashMap::new()),
                catch_up_tx,
                ack_timeout: ACK_TIMEOUT,
            },
            catch_up_rx,
        )
    }

    #[cfg(test)]
    fn with_ack_timeout(timeout: Duration) -> (Self, mpsc::Receiver<CatchUpSignal>) {
        let (dispatcher, rx) = Self::new();
        (
            Self {
                ack_timeout: timeout,
                ..dispatcher
            },
            rx,
        )
    }

    pub async fn subscribe(&self, name: impl Into<String>, tx: mpsc::Sender<Candlestick>) {
        let name = name.into();
        info!(subscriber = %name, "registering candle subscriber");
        self.subscribers.write().await.insert(name, tx);
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Delivers a copy of the candle to every subscriber, then waits for
    /// exactly one ack per subscriber. Any subscriber missing the window
    /// fails the whole delivery, keeping per-stream processing serialized.
    pub async fn notify_subscribers(&self, candle: Candlestick) -> Result<(), DispatchError> {
        let subscribers = self.subscribers.read().await;
        let mut pending = Vec::with_capacity(subscribers.len());

        for (name, tx) in subscribers.iter() {
            let (status_tx, status_rx) = mpsc::channel(1);
            let mut copy = candle.clone();
            copy.status = Some(status_tx);
            if tx.send(copy).await.is_err() {
                return Err(DispatchError::SubscriberGone { name: name.clone() });
            }
            pending.push((name.clone(), status_rx));
        }
        drop(subscribers);

        for (name, mut status_rx) in pending {
            match timeout(self.ack_timeout, status_rx.recv()).await {
                Ok(Some(status)) => {
                    debug!(subscriber = %name, ?status, "candle acked");
                }
                Ok(None) => {
                    return Err(DispatchError::SubscriberGone { name });
                }
                Err(_) => {
                    return Err(DispatchError::AckTimeout {
                        name,
                        timeout_ms: self.ack_timeout.as_millis() as u64,
                    });
                }
            }
        }
        Ok(())
    }

    /// Queues a catch-up request without blocking; overflow is shed with
    /// an error log so live candle flow is never held up.
    pub fn send_catch_up_signal(&self, signal: CatchUpSignal) {
        if let Err(err) = self.catch_up_tx.try_send(signal) {
            let signal = match err {
                mpsc::error::TrySendError::Full(s) => s,
                mpsc::error::TrySendError::Closed(s) => s,
            };
            error!(
                "{}",
                DispatchError::QueueFull {
                    market: signal.market,
                    timeframe: signal.timeframe,
                }
            );
        }
    }

    /// Drains catch-up signals through a bounded worker pool. Each worker
    /// fetches history from the market client, parses candles, and pushes
    /// them through the regular fan-out path. In-flight fetches finish
    /// their work after shutdown is signalled; no new ones start, and
    /// `run` does not return until every worker has been joined.
    pub async fn run(
        self: Arc<Self>,
        mut catch_up_rx: mpsc::Receiver<CatchUpSignal>,
        client: Arc<dyn MarketDataClient>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("candle dispatcher started");
        let workers = Arc::new(Semaphore::new(CATCH_UP_WORKERS));
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("candle dispatcher stopping");
                    break;
                }
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                signal = catch_up_rx.recv() => {
                    let Some(signal) = signal else {
                        warn!("catch-up channel closed, dispatcher stopping");
                        break;
                    };
                    let permit = Arc::clone(&workers)
                        .acquire_owned()
                        .await
                        .expect("worker semaphore closed");
                    let dispatcher = Arc::clone(&self);
                    let client = Arc::clone(&client);
                    in_flight.spawn(async move {
                        dispatcher.catch_up(client, signal).await;
                        drop(permit);
                    });
                }
            }
        }

        while in_flight.join_next().await.is_some() {}
        info!("candle dispatcher stopped");
    }

    async fn catch_up(&self, client: Arc<dyn MarketDataClient>, signal: CatchUpSignal) {
        debug!(
            market = %signal.market,
            timeframe = %signal.timeframe,
            start = %signal.start,
            "running catch-up fetch"
        );

        let records = match client
            .fetch_index_intraday_historical(&signal.market, signal.timeframe, signal.start, None)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(
                    market = %signal.market,
                    timeframe = %signal.timeframe,
                    "catch-up fetch failed, will retry on the next tick: {e:#}"
                );
                return;
            }
        };

        for record in records {
            let candle = match record.into_candle(&signal.market, signal.timeframe) {
                Ok(candle) => candle,
                Err(e) => {
                    warn!(market = %signal.market, "skipping record: {e}");
                    continue;
                }
            };
            if let Err(e) = self.notify_subscribers(candle).await {
                error!(market = %signal.market, "catch-up delivery failed: {e}");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::timeframe::Timeframe;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candle() -> Candlestick {
        let date = New_York.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();
        Candlestick::new("^NDX", Timeframe::FiveMin, 10.0, 12.0, 9.0, 11.0, 5.0, date)
    }

    /// Subscriber loop that acks every candle it sees.
    fn acking_subscriber(counter: Arc<AtomicUsize>) -> mpsc::Sender<Candlestick> {
        let (tx, mut rx) = mpsc::channel::<Candlestick>(8);
        tokio::spawn(async move {
            while let Some(candle) = rx.recv().await {
                counter.fetch_add(1, Ordering::SeqCst);
                candle.ack(ProcessStatus::Processed);
            }
        });
        tx
    }

    #[tokio::test]
    async fn test_fan_out_waits_for_all_acks() {
        let (dispatcher, _catch_up) = CandleDispatcher::new();
        let seen_a = Arc::new(AtomicUsize::new(0));
        let seen_b = Arc::new(AtomicUsize::new(0));
        dispatcher.subscribe("a", acking_subscriber(Arc::clone(&seen_a))).await;
        dispatcher.subscribe("b", acking_subscriber(Arc::clone(&seen_b))).await;

        for _ in 0..3 {
            dispatcher.notify_subscribers(candle()).await.unwrap();
        }

        assert_eq!(seen_a.load(Ordering::SeqCst), 3);
        assert_eq!(seen_b.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_silent_subscriber_times_out() {
        let (dispatcher, _catch_up) =
            CandleDispatcher::with_ack_timeout(Duration::from_millis(50));

        // Swallows candles without acking.
        let (tx, mut rx) = mpsc::channel::<Candlestick>(8);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        dispatcher.subscribe("mute", tx).await;

        let err = dispatcher.notify_subscribers(candle()).await;
        assert!(matches!(err, Err(DispatchError::AckTimeout { .. })));
    }

    #[tokio::test]
    async fn test_catch_up_overflow_drops() {
        let (dispatcher, mut catch_up_rx) = CandleDispatcher::new();
        let date = New_York.with_ymd_and_hms(2024, 3, 4, 9, 30, 0).unwrap();

        for _ in 0..CATCH_UP_CAPACITY + 10 {
            dispatcher.send_catch_up_signal(CatchUpSignal {
                market: "^NDX".to_string(),
                timeframe: Timeframe::FiveMin,
                start: date,
            });
        }

        let mut drained = 0;
        while catch_up_rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, CATCH_UP_CAPACITY);
    }

    #[tokio::test]
    async fn test_no_subscribers_is_ok() {
        let (dispatcher, _catch_up) = CandleDispatcher::new();
        assert!(dispatcher.notify_subscribers(candle()).await.is_ok());
    }

    #[tokio::test]
    async fn test_run_joins_in_flight_catch_up_on_shutdown() {
        use crate::domain::ports::CandleRecord;
        use crate::infrastructure::mock::ScriptedMarketData;

        let (dispatcher, catch_up_rx) = CandleDispatcher::new();
        let dispatcher = Arc::new(dispatcher);
        let acks = Arc::new(AtomicUsize::new(0));
        dispatcher
            .subscribe("^NDX", acking_subscriber(Arc::clone(&acks)))
            .await;

        let record = CandleRecord {
            open: 10.0,
            close: 11.0,
            high: 12.0,
            low: 9.0,
            volume: 100.0,
            date: "2024-03-04 09:30:00".to_string(),
        };
        let client = Arc::new(ScriptedMarketData::new(vec![vec![
            record.clone(),
            record,
        ]]));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let runner = tokio::spawn(Arc::clone(&dispatcher).run(
            catch_up_rx,
            client.clone(),
            shutdown_rx,
        ));

        let date = New_York.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        dispatcher.send_catch_up_signal(CatchUpSignal {
            market: "^NDX".to_string(),
            timeframe: Timeframe::FiveMin,
            start: date,
        });

        // Wait until the worker has started its fetch, then shut down.
        for _ in 0..50 {
            if !client.calls().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let _ = shutdown_tx.send(true);
        runner.await.unwrap();

        // The in-flight fetch ran to completion before run() returned.
        assert_eq!(acks.load(Ordering::SeqCst), 2);
    }
}
