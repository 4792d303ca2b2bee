use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::application::bus::RequestBus;
use crate::domain::market::candle::{CandleKind, CandleMetadata, Momentum, ProcessStatus, Sentiment};
use crate::domain::market::level::LevelKind;
use crate::domain::market::reaction::{Focus, Reaction, ReactionKind};
use crate::domain::market::session;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::trend::{self, TrendSignal};
use crate::domain::requests::{
    CandleMetadataRequest, MarketRequest, MarketSkewRequest, VwapDataRequest,
};
use crate::domain::signals::{Direction, EntrySignal, ExitSignal, MarketSkew};

/// VWAP observations fed to the trend regression.
const TREND_WINDOW: usize = 20;
/// Distance from the focus price to the protective stop.
const STOP_LOSS_POINTS_RANGE: f64 = 10.0;
/// Independent confirmations required before an entry is proposed.
const MIN_ENTRY_CONFLUENCE: u32 = 2;

/// Turns classified reactions into entry/exit proposals for the position
/// manager, pulling candle metadata, the VWAP trend, and the current skew
/// over the request bus for confluence.
pub struct SignalEngine {
    bus: RequestBus,
    entry_tx: mpsc::Sender<EntrySignal>,
    exit_tx: mpsc::Sender<ExitSignal>,
}

impl SignalEngine {
    pub fn new(
        bus: RequestBus,
        entry_tx: mpsc::Sender<EntrySignal>,
        exit_tx: mpsc::Sender<ExitSignal>,
    ) -> Self {
        Self {
            bus,
            entry_tx,
            exit_tx,
        }
    }

    pub async fn run(
        self,
        mut reaction_rx: mpsc::Receiver<Reaction>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("signal engine started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("signal engine stopping");
                    break;
                }
                reaction = reaction_rx.recv() => {
                    let Some(reaction) = reaction else { break };
                    self.handle_reaction(reaction).await;
                }
            }
        }
    }

    pub async fn handle_reaction(&self, reaction: Reaction) {
        match reaction.reaction {
            ReactionKind::Reversal => self.consider_entry(&reaction).await,
            ReactionKind::Break => self.consider_exit(&reaction).await,
            ReactionKind::Chop => {}
        }
        if let Some(tx) = &reaction.status {
            let _ = tx.try_send(ProcessStatus::Processed);
        }
    }

    /// A reversal holds the focus: propose going with the bounce when
    /// enough independent confirmations stack up.
    async fn consider_entry(&self, reaction: &Reaction) {
        let direction = match reaction.level_kind {
            LevelKind::Support => Direction::Long,
            LevelKind::Resistance => Direction::Short,
        };

        let mut confluence = 1;
        let mut reasons = vec![format!(
            "reversal at {} {:.2}",
            reaction.level_kind,
            focus_price(reaction)
        )];

        let trend = self.vwap_trend(&reaction.market, reaction.timeframe).await;
        if opposes(trend, direction) && trend.is_strong() {
            debug!(
                market = %reaction.market,
                %trend,
                %direction,
                "entry vetoed by opposing trend"
            );
            return;
        }
        if agrees(trend, direction) {
            confluence += 1;
            reasons.push(format!("{trend} vwap trend"));
        }

        if let Some(metadata) = self.candle_metadata(&reaction.market, reaction.timeframe).await {
            if metadata.engulfing && sentiment_matches(metadata.sentiment, direction) {
                confluence += 1;
                reasons.push("engulfing confirmation".to_string());
            }
            if metadata.momentum == Momentum::High {
                confluence += 1;
                reasons.push("high volume momentum".to_string());
            }
            if metadata.kind == CandleKind::Pinbar {
                confluence += 1;
                reasons.push("pinbar rejection".to_string());
            }
        }

        if session::in_high_volume_window(reaction.created_on).unwrap_or(false) {
            confluence += 1;
            reasons.push("high volume window".to_string());
        }

        let skew = self.market_skew(&reaction.market).await;
        if skew.agrees_with(direction) {
            confluence += 1;
            reasons.push("aligned market skew".to_string());
        }

        if confluence < MIN_ENTRY_CONFLUENCE {
            debug!(
                market = %reaction.market,
                confluence,
                "entry below confluence threshold"
            );
            return;
        }

        let anchor = focus_price(reaction);
        let stop_loss = match direction {
            Direction::Long => anchor - STOP_LOSS_POINTS_RANGE,
            Direction::Short => anchor + STOP_LOSS_POINTS_RANGE,
        };

        let signal = EntrySignal {
            market: reaction.market.clone(),
            timeframe: reaction.timeframe,
            direction,
            price: reaction.current_price,
            reasons,
            confluence,
            stop_loss,
            stop_loss_points_range: STOP_LOSS_POINTS_RANGE,
            created_on: reaction.created_on,
            status: None,
        };
        info!(
            market = %signal.market,
            direction = %signal.direction,
            price = signal.price,
            confluence = signal.confluence,
            "entry signal"
        );
        if self.entry_tx.send(signal).await.is_err() {
            warn!("entry channel closed");
        }
    }

    /// A confirmed-side break flips the focus against any position riding
    /// it: tell the position manager to get out of the broken side.
    async fn consider_exit(&self, reaction: &Reaction) {
        // Breaking support strands longs; breaking resistance strands shorts.
        let stranded = match reaction.level_kind {
            LevelKind::Support => Direction::Long,
            LevelKind::Resistance => Direction::Short,
        };

        let skew = self.market_skew(&reaction.market).await;
        if !skew.agrees_with(stranded) {
            debug!(
                market = %reaction.market,
                %stranded,
                "break with no exposed position, no exit"
            );
            return;
        }

        let mut confluence = 1;
        let mut reasons = vec![format!(
            "break of {} {:.2}",
            reaction.level_kind,
            focus_price(reaction)
        )];

        let trend = self.vwap_trend(&reaction.market, reaction.timeframe).await;
        if opposes(trend, stranded) {
            confluence += 1;
            reasons.push(format!("{trend} vwap trend against position"));
        }

        let signal = ExitSignal {
            market: reaction.market.clone(),
            timeframe: reaction.timeframe,
            direction: stranded,
            price: reaction.current_price,
            reasons,
            confluence,
            created_on: reaction.created_on,
            status: None,
        };
        info!(
            market = %signal.market,
            direction = %signal.direction,
            price = signal.price,
            "exit signal"
        );
        if self.exit_tx.send(signal).await.is_err() {
            warn!("exit channel closed");
        }
    }

    async fn candle_metadata(
        &self,
        market: &str,
        timeframe: Timeframe,
    ) -> Option<CandleMetadata> {
        let (respond_to, response) = oneshot::channel();
        let request = MarketRequest::CandleMetadata(CandleMetadataRequest {
            market: market.to_string(),
            timeframe,
            respond_to,
        });
        if let Err(e) = self.bus.route(request).await {
            warn!("metadata request failed: {e:#}");
            return None;
        }
        response.await.ok().flatten()
    }

    async fn vwap_trend(&self, market: &str, timeframe: Timeframe) -> TrendSignal {
        let (respond_to, response) = oneshot::channel();
        let request = MarketRequest::VwapData(VwapDataRequest {
            market: market.to_string(),
            timeframe,
            respond_to,
        });
        if let Err(e) = self.bus.route(request).await {
            warn!("vwap data request failed: {e:#}");
            return TrendSignal::Choppy;
        }
        let Ok(series) = response.await else {
            return TrendSignal::Choppy;
        };
        let values: Vec<f64> = series
            .iter()
            .rev()
            .take(TREND_WINDOW)
            .rev()
            .map(|e| e.value)
            .collect();
        trend::analyze(&values).signal
    }

    async fn market_skew(&self, market: &str) -> MarketSkew {
        let (respond_to, response) = oneshot::channel();
        let request = MarketRequest::MarketSkew(MarketSkewRequest {
            market: market.to_string(),
            respond_to,
        });
        if let Err(e) = self.bus.route(request).await {
            warn!("skew request failed: {e:#}");
            return MarketSkew::Neutral;
        }
        response.await.unwrap_or(MarketSkew::Neutral)
    }
}

/// Reference price of the focus the reaction was classified against.
fn focus_price(reaction: &Reaction) -> f64 {
    match &reaction.focus {
        Focus::Level(level) => level.price,
        Focus::Imbalance(imb) => match imb.sentiment {
            Sentiment::Bearish => imb.high,
            _ => imb.low,
        },
        Focus::Vwap { series, .. } => series
            .last()
            .map(|e| e.value)
            .unwrap_or(reaction.current_price),
    }
}

fn agrees(trend: TrendSignal, direction: Direction) -> bool {
    match direction {
        Direction::Long => trend.is_bullish(),
        Direction::Short => trend.is_bearish(),
    }
}

fn opposes(trend: TrendSignal, direction: Direction) -> bool {
    match direction {
        Direction::Long => trend.is_bearish(),
        Direction::Short => trend.is_bullish(),
    }
}

fn sentiment_matches(sentiment: Sentiment, direction: Direction) -> bool {
    matches!(
        (sentiment, direction),
        (Sentiment::Bullish, Direction::Long) | (Sentiment::Bearish, Direction::Short)
    )
}
