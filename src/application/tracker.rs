use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use chrono_tz::America::New_York;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::application::dispatcher::CandleDispatcher;
use crate::application::snapshots::{
    CandleSnapshot, ImbalanceSnapshot, LevelSnapshot, SessionSnapshot, VwapSnapshot,
};
use crate::application::vwap_engine::VwapEngine;
use crate::domain::errors::BuildError;
use crate::domain::market::candle::{Candlestick, ProcessStatus};
use crate::domain::market::level::Level;
use crate::domain::market::reaction::{self, Focus, PRICE_DATA_WINDOW, Reaction};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::ports::{Job, JobScheduler, SkewProvider};
use crate::domain::requests::MarketRequest;
use crate::domain::signals::{CatchUpSignal, LevelSignal};
use crate::domain::validation::StrictCandleValidator;

/// A focus may be classified at most once per this many 5m updates.
pub const MAX_PRICE_DATA_REQUEST_INTERVAL: u64 = 3;
/// Two candidate levels within this distance collapse into one.
const LEVEL_DEDUP_EPSILON: f64 = 0.5;

/// Owns every snapshot for one market and applies each incoming candle:
/// session rollover, VWAP accumulation, level/imbalance lifecycles,
/// displacement detection, and reaction generation at tracked foci.
pub struct MarketTracker {
    market: String,
    candles: HashMap<Timeframe, Arc<CandleSnapshot>>,
    vwaps: HashMap<Timeframe, Arc<VwapSnapshot>>,
    vwap_engines: HashMap<Timeframe, Arc<VwapEngine>>,
    levels: Arc<LevelSnapshot>,
    imbalances: Arc<ImbalanceSnapshot>,
    sessions: Arc<SessionSnapshot>,
    skew_provider: Arc<dyn SkewProvider>,
    reaction_tx: mpsc::Sender<Reaction>,
    five_min_updates: u64,
    focus_cadence: HashMap<String, u64>,
}

impl MarketTracker {
    pub fn new(
        market: impl Into<String>,
        skew_provider: Arc<dyn SkewProvider>,
        reaction_tx: mpsc::Sender<Reaction>,
    ) -> Result<Self, BuildError> {
        let market = market.into();

        let mut candles = HashMap::new();
        let mut vwaps = HashMap::new();
        let mut vwap_engines = HashMap::new();
        for timeframe in Timeframe::all() {
            let vwap_snapshot = Arc::new(VwapSnapshot::with_default_capacity(timeframe));
            candles.insert(
                timeframe,
                Arc::new(CandleSnapshot::with_default_capacity(timeframe)),
            );
            vwap_engines.insert(
                timeframe,
                Arc::new(VwapEngine::new(
                    market.clone(),
                    timeframe,
                    Arc::clone(&vwap_snapshot),
                )),
            );
            vwaps.insert(timeframe, vwap_snapshot);
        }

        Ok(Self {
            market,
            candles,
            vwaps,
            vwap_engines,
            levels: Arc::new(LevelSnapshot::with_default_capacity()),
            imbalances: Arc::new(ImbalanceSnapshot::with_default_capacity()),
            sessions: Arc::new(SessionSnapshot::with_default_capacity()),
            skew_provider,
            reaction_tx,
            five_min_updates: 0,
            focus_cadence: HashMap::new(),
        })
    }

    pub fn market(&self) -> &str {
        &self.market
    }

    pub fn levels(&self) -> &Arc<LevelSnapshot> {
        &self.levels
    }

    pub fn imbalances(&self) -> &Arc<ImbalanceSnapshot> {
        &self.imbalances
    }

    pub fn sessions(&self) -> &Arc<SessionSnapshot> {
        &self.sessions
    }

    /// Registers this market's recurring jobs on the shared scheduler:
    /// per-timeframe market-data fetches offset five seconds past each
    /// interval boundary, the daily session generation, and the daily
    /// VWAP reset after the NewYork close.
    pub fn register_jobs(
        &self,
        scheduler: &Arc<dyn JobScheduler>,
        dispatcher: &Arc<CandleDispatcher>,
        now: DateTime<Tz>,
    ) {
        for timeframe in Timeframe::all() {
            let fetch_name = format!("fetchMarketData/{}/{}", self.market, timeframe);
            let market = self.market.clone();
            let dispatcher = Arc::clone(dispatcher);
            let job: Job = Arc::new(move || {
                let market = market.clone();
                let dispatcher = Arc::clone(&dispatcher);
                Box::pin(async move {
                    let now = Utc::now().with_timezone(&New_York);
                    // Reach back past the just-closed bar.
                    let start = timeframe.next_interval(now)
                        - ChronoDuration::seconds(2 * timeframe.seconds());
                    dispatcher.send_catch_up_signal(CatchUpSignal {
                        market,
                        timeframe,
                        start,
                    });
                })
            });
            scheduler.register(
                &fetch_name,
                timeframe.fetch_interval(),
                timeframe.next_interval(now) + ChronoDuration::seconds(5),
                job,
            );

            let reset_name = format!("vwapReset/{}/{}", self.market, timeframe);
            let engine = Arc::clone(&self.vwap_engines[&timeframe]);
            let job: Job = Arc::new(move || {
                let engine = Arc::clone(&engine);
                Box::pin(async move { engine.reset() })
            });
            scheduler.register(
                &reset_name,
                std::time::Duration::from_secs(24 * 3600),
                next_daily(now, 17, 0, 10),
                job,
            );
        }

        let sessions_name = format!("generateNewSessions/{}", self.market);
        let sessions = Arc::clone(&self.sessions);
        let market = self.market.clone();
        let job: Job = Arc::new(move || {
            let sessions = Arc::clone(&sessions);
            let market = market.clone();
            Box::pin(async move {
                let now = Utc::now().with_timezone(&New_York);
                if let Err(e) = sessions.generate_new_sessions(now) {
                    error!(market = %market, "session generation failed: {e}");
                }
            })
        });
        scheduler.register(
            &sessions_name,
            std::time::Duration::from_secs(24 * 3600),
            next_daily(now, 0, 1, 0),
            job,
        );
    }

    /// Serialized intake loop: one candle or one request at a time, until
    /// both feeds close or shutdown fires.
    pub async fn run(
        mut self,
        mut candle_rx: mpsc::Receiver<Candlestick>,
        mut request_rx: mpsc::Receiver<MarketRequest>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(market = %self.market, "market tracker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(market = %self.market, "market tracker stopping");
                    break;
                }
                candle = candle_rx.recv() => {
                    let Some(candle) = candle else { break };
                    self.process_candle(candle).await;
                }
                request = request_rx.recv() => {
                    let Some(request) = request else { break };
                    self.service_request(request).await;
                }
            }
        }
    }

    /// Applies one candle to every owned structure, then acks.
    pub async fn process_candle(&mut self, mut candle: Candlestick) {
        if candle.market != self.market {
            warn!(
                market = %self.market,
                got = %candle.market,
                "dropping candle for foreign market"
            );
            candle.ack(ProcessStatus::Rejected);
            return;
        }
        if !StrictCandleValidator::validate_candle(&candle) {
            candle.ack(ProcessStatus::Rejected);
            return;
        }

        if let Err(e) = self.sessions.generate_new_sessions(candle.date) {
            error!(market = %self.market, "session generation failed: {e}");
            candle.ack(ProcessStatus::Rejected);
            return;
        }
        match self.sessions.set_current_session(candle.date) {
            Ok(true) => self.raise_level_signals(&candle),
            Ok(false) => {}
            Err(e) => error!(market = %self.market, "session pointer update failed: {e}"),
        }
        self.sessions.absorb(candle.high, candle.low);

        if let Err(e) = self.vwap_engines[&candle.timeframe].update(&mut candle) {
            error!(market = %self.market, "vwap update failed: {e}");
        }

        if let Err(e) = self.candles[&candle.timeframe].update(candle.clone()) {
            error!(market = %self.market, "candle snapshot update failed: {e}");
            candle.ack(ProcessStatus::Rejected);
            return;
        }

        self.levels.update(&candle);
        self.imbalances.update(&candle);

        if candle.timeframe == Timeframe::FiveMin {
            self.five_min_updates += 1;
            self.detect_new_imbalance();
            self.generate_reactions(&candle);
        }

        candle.ack(ProcessStatus::Processed);
    }

    /// Converts the just-frozen session's extrema into level signals and
    /// applies them, deduplicating against levels already tracked nearby.
    fn raise_level_signals(&self, candle: &Candlestick) {
        let Some((high, low)) = self.sessions.fetch_last_session_high_low() else {
            return;
        };
        for price in [high, low] {
            let signal = LevelSignal {
                market: self.market.clone(),
                price,
            };
            self.apply_level_signal(signal, candle);
        }
    }

    fn apply_level_signal(&self, signal: LevelSignal, candle: &Candlestick) {
        if self.levels.exists_near(signal.price, LEVEL_DEDUP_EPSILON) {
            debug!(
                market = %self.market,
                price = signal.price,
                "level signal ignored, existing level nearby"
            );
            return;
        }
        let level = Level::new(signal.market, signal.price, candle);
        info!(
            market = %self.market,
            price = level.price,
            kind = %level.kind(),
            "tracking new level"
        );
        self.levels.add(Arc::new(level));
    }

    fn detect_new_imbalance(&self) {
        let Some(imbalance) = self.candles[&Timeframe::FiveMin].detect_imbalance() else {
            return;
        };
        info!(
            market = %self.market,
            sentiment = %imbalance.sentiment,
            high = imbalance.high,
            low = imbalance.low,
            gap_ratio = imbalance.gap_ratio,
            "tracking new imbalance"
        );
        self.imbalances.add(Arc::new(imbalance));
    }

    /// Classifies the newest 4-candle window against every qualifying
    /// focus, honoring the per-focus request cadence.
    fn generate_reactions(&mut self, candle: &Candlestick) {
        let window = self.candles[&Timeframe::FiveMin].last_n(PRICE_DATA_WINDOW);
        if window.len() != PRICE_DATA_WINDOW {
            return;
        }

        let window_low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let window_high = window
            .iter()
            .map(|c| c.high)
            .fold(f64::NEG_INFINITY, f64::max);

        for level in self.levels.active() {
            if level.price < window_low || level.price > window_high {
                continue;
            }
            let focus = Focus::Level(Arc::clone(&level));
            if !self.cadence_allows(&focus.cadence_key()) {
                continue;
            }
            match reaction::classify(&window, focus) {
                Ok(r) => {
                    level.apply_reaction(r.reaction);
                    self.publish_reaction(r);
                }
                Err(e) => error!(market = %self.market, "level reaction failed: {e}"),
            }
        }

        for imbalance in self
            .imbalances
            .filter(candle, |_, i| !i.is_invalidated())
        {
            if !imbalance.tagged(candle) {
                continue;
            }
            let focus = Focus::Imbalance(Arc::clone(&imbalance));
            if !self.cadence_allows(&focus.cadence_key()) {
                continue;
            }
            match reaction::classify(&window, focus) {
                Ok(r) => self.publish_reaction(r),
                Err(e) => error!(market = %self.market, "imbalance reaction failed: {e}"),
            }
        }

        let series = self.vwaps[&Timeframe::FiveMin].last_n(PRICE_DATA_WINDOW);
        if series.len() == PRICE_DATA_WINDOW {
            let focus = Focus::Vwap {
                timeframe: Timeframe::FiveMin,
                series,
            };
            if self.cadence_allows(&focus.cadence_key()) {
                match reaction::classify(&window, focus) {
                    Ok(r) => self.publish_reaction(r),
                    Err(e) => error!(market = %self.market, "vwap reaction failed: {e}"),
                }
            }
        }
    }

    fn cadence_allows(&mut self, key: &str) -> bool {
        let now = self.five_min_updates;
        match self.focus_cadence.get(key) {
            Some(last) if now.saturating_sub(*last) < MAX_PRICE_DATA_REQUEST_INTERVAL => false,
            _ => {
                self.focus_cadence.insert(key.to_string(), now);
                true
            }
        }
    }

    fn publish_reaction(&self, reaction: Reaction) {
        debug!(
            market = %self.market,
            kind = %reaction.reaction,
            level_kind = %reaction.level_kind,
            price = reaction.current_price,
            "reaction classified"
        );
        // Non-blocking: the signal engine may be mid-request against this
        // tracker, so a full queue sheds instead of wedging the loop.
        if let Err(e) = self.reaction_tx.try_send(reaction) {
            warn!(market = %self.market, "reaction dropped: {e}");
        }
    }

    /// Answers a typed request with a point-in-time copy. The responder is
    /// single-shot; a vanished requester is not an error.
    pub async fn service_request(&self, request: MarketRequest) {
        match request {
            MarketRequest::CandleMetadata(r) => {
                let snapshot = &self.candles[&r.timeframe];
                let metadata =
                    snapshot.last().map(|c| c.metadata(snapshot.previous().as_ref()));
                let _ = r.respond_to.send(metadata);
            }
            MarketRequest::PriceData(r) => {
                let _ = r.respond_to.send(self.candles[&r.timeframe].last_n(r.count));
            }
            MarketRequest::AverageVolume(r) => {
                let _ = r
                    .respond_to
                    .send(self.candles[&r.timeframe].average_volume(r.count));
            }
            MarketRequest::Vwap(r) => {
                let _ = r.respond_to.send(self.vwaps[&r.timeframe].at(r.at));
            }
            MarketRequest::VwapData(r) => {
                let snapshot = &self.vwaps[&r.timeframe];
                let _ = r.respond_to.send(snapshot.last_n(snapshot.len()));
            }
            MarketRequest::MarketSkew(r) => {
                let skew = self.skew_provider.market_skew(&r.market).await;
                let _ = r.respond_to.send(skew);
            }
        }
    }
}

/// Next occurrence of `HH:MM:SS` on the New-York clock at or after `now`.
fn next_daily(now: DateTime<Tz>, hour: u32, minute: u32, second: u32) -> DateTime<Tz> {
    let today = now
        .with_hour(hour)
        .and_then(|t| t.with_minute(minute))
        .and_then(|t| t.with_second(second))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(now);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}
