use anyhow::{Context, Result};
use chrono::Utc;
use chrono_tz::America::New_York;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::application::bus::RequestBus;
use crate::application::dispatcher::CandleDispatcher;
use crate::application::signal_engine::SignalEngine;
use crate::application::tracker::MarketTracker;
use crate::config::Config;
use crate::domain::errors::BuildError;
use crate::domain::ports::{JobScheduler, MarketDataClient, SkewProvider};
use crate::domain::signals::{EntrySignal, ExitSignal};

/// Per-subscriber candle queue depth.
const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;
/// Classified reactions in flight between trackers and the signal engine.
const REACTION_CHANNEL_CAPACITY: usize = 64;
const REQUEST_CHANNEL_CAPACITY: usize = 32;
const SIGNAL_CHANNEL_CAPACITY: usize = 32;

/// The assembled pipeline: one dispatcher, one tracker per market, one
/// signal engine, and the scheduler jobs that keep data flowing.
pub struct Application {
    dispatcher: Arc<CandleDispatcher>,
    bus: RequestBus,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
    entry_rx: Option<mpsc::Receiver<EntrySignal>>,
    exit_rx: Option<mpsc::Receiver<ExitSignal>>,
}

impl Application {
    /// Wires every component and spawns the long-running loops. Fails fast
    /// on construction problems; nothing is spawned unless everything
    /// validated.
    pub async fn build(
        config: &Config,
        client: Arc<dyn MarketDataClient>,
        skew_provider: Arc<dyn SkewProvider>,
        scheduler: Arc<dyn JobScheduler>,
    ) -> Result<Self> {
        if config.markets.is_empty() {
            return Err(BuildError::NoMarkets).context("configuration rejected");
        }

        let (dispatcher, catch_up_rx) = CandleDispatcher::new();
        let dispatcher = Arc::new(dispatcher);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (reaction_tx, reaction_rx) = mpsc::channel(REACTION_CHANNEL_CAPACITY);
        let (entry_tx, entry_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

        let mut bus = RequestBus::new();
        let mut handles = Vec::new();
        let now = Utc::now().with_timezone(&New_York);

        for market in &config.markets {
            let tracker = MarketTracker::new(
                market.clone(),
                Arc::clone(&skew_provider),
                reaction_tx.clone(),
            )
            .with_context(|| format!("building tracker for {market}"))?;
            tracker.register_jobs(&scheduler, &dispatcher, now);

            let (candle_tx, candle_rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
            let (request_tx, request_rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
            dispatcher.subscribe(market.clone(), candle_tx).await;
            bus.add_route(market.clone(), request_tx);

            handles.push(tokio::spawn(tracker.run(
                candle_rx,
                request_rx,
                shutdown_rx.clone(),
            )));
        }
        drop(reaction_tx);

        let engine = SignalEngine::new(bus.clone(), entry_tx, exit_tx);
        handles.push(tokio::spawn(engine.run(reaction_rx, shutdown_rx.clone())));

        handles.push(tokio::spawn(Arc::clone(&dispatcher).run(
            catch_up_rx,
            client,
            shutdown_rx,
        )));

        info!(markets = config.markets.len(), "pipeline assembled");
        Ok(Self {
            dispatcher,
            bus,
            shutdown_tx,
            handles,
            entry_rx: Some(entry_rx),
            exit_rx: Some(exit_rx),
        })
    }

    pub fn dispatcher(&self) -> Arc<CandleDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn bus(&self) -> RequestBus {
        self.bus.clone()
    }

    /// Hands the entry/exit feeds to the position manager. Each can be
    /// taken once.
    pub fn take_entry_feed(&mut self) -> Option<mpsc::Receiver<EntrySignal>> {
        self.entry_rx.take()
    }

    pub fn take_exit_feed(&mut self) -> Option<mpsc::Receiver<ExitSignal>> {
        self.exit_rx.take()
    }

    /// Signals every loop to stop and waits for them to drain.
    pub async fn shutdown(self) {
        info!("shutting down pipeline");
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("pipeline stopped");
    }
}
