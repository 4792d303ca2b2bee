use chrono::DateTime;
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::domain::errors::ContractError;
use crate::domain::market::candle::{Candlestick, ProcessStatus, Sentiment};
use crate::domain::market::imbalance::Imbalance;
use crate::domain::market::level::{Level, LevelKind};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::vwap::VwapEntry;

/// Number of candles a price-data window holds.
pub const PRICE_DATA_WINDOW: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceMovement {
    Above,
    Below,
    Equal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Chop,
    Reversal,
    Break,
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactionKind::Chop => write!(f, "chop"),
            ReactionKind::Reversal => write!(f, "reversal"),
            ReactionKind::Break => write!(f, "break"),
        }
    }
}

/// The point of interest a price-data window is judged against.
#[derive(Debug, Clone)]
pub enum Focus {
    Level(Arc<Level>),
    Imbalance(Arc<Imbalance>),
    Vwap {
        timeframe: Timeframe,
        series: Vec<VwapEntry>,
    },
}

impl Focus {
    /// Stable identity used for reaction-cadence bookkeeping.
    pub fn cadence_key(&self) -> String {
        match self {
            Focus::Level(level) => format!("level:{}", level.price),
            Focus::Imbalance(imb) => format!("imbalance:{}:{}", imb.sentiment, imb.date),
            Focus::Vwap { timeframe, .. } => format!("vwap:{}", timeframe),
        }
    }

    fn level_kind(&self, window: &[Candlestick]) -> LevelKind {
        match self {
            Focus::Level(level) => level.kind(),
            Focus::Imbalance(imb) => match imb.sentiment {
                Sentiment::Bearish => LevelKind::Resistance,
                _ => LevelKind::Support,
            },
            // The VWAP line acts as support while price opens the window
            // above it, resistance otherwise.
            Focus::Vwap { series, .. } => {
                let above = window
                    .first()
                    .zip(series.first())
                    .map(|(c, v)| c.close >= v.value)
                    .unwrap_or(true);
                if above {
                    LevelKind::Support
                } else {
                    LevelKind::Resistance
                }
            }
        }
    }

    /// Reference price line, one value per window slot.
    fn reference(&self, window: &[Candlestick]) -> Result<Vec<f64>, ContractError> {
        match self {
            Focus::Level(level) => Ok(vec![level.price; window.len()]),
            Focus::Imbalance(imb) => {
                let edge = match imb.sentiment {
                    Sentiment::Bearish => imb.high,
                    _ => imb.low,
                };
                Ok(vec![edge; window.len()])
            }
            Focus::Vwap { series, .. } => {
                if series.len() != window.len() {
                    return Err(ContractError::SeriesLength {
                        candles: window.len(),
                        vwaps: series.len(),
                    });
                }
                Ok(series.iter().map(|v| v.value).collect())
            }
        }
    }
}

/// How price behaved around a focus over the last four candles.
#[derive(Debug, Clone)]
pub struct Reaction {
    pub market: String,
    pub timeframe: Timeframe,
    pub level_kind: LevelKind,
    pub current_price: f64,
    pub reaction: ReactionKind,
    pub price_movement: [PriceMovement; PRICE_DATA_WINDOW],
    pub created_on: DateTime<Tz>,
    pub focus: Focus,
    pub status: Option<mpsc::Sender<ProcessStatus>>,
}

/// Classifies a four-candle window against a focus.
pub fn classify(window: &[Candlestick], focus: Focus) -> Result<Reaction, ContractError> {
    if window.len() != PRICE_DATA_WINDOW {
        return Err(ContractError::WindowSize {
            expected: PRICE_DATA_WINDOW,
            got: window.len(),
        });
    }

    let refs = focus.reference(window)?;
    let level_kind = focus.level_kind(window);

    let mut movement = [PriceMovement::Equal; PRICE_DATA_WINDOW];
    for (slot, (candle, reference)) in movement.iter_mut().zip(window.iter().zip(&refs)) {
        *slot = if candle.close > *reference {
            PriceMovement::Above
        } else if candle.close < *reference {
            PriceMovement::Below
        } else {
            PriceMovement::Equal
        };
    }

    let reaction = match level_kind {
        LevelKind::Support => classify_movement(movement, PriceMovement::Above, PriceMovement::Below),
        LevelKind::Resistance => {
            classify_movement(movement, PriceMovement::Below, PriceMovement::Above)
        }
    };

    let last = &window[PRICE_DATA_WINDOW - 1];
    Ok(Reaction {
        market: last.market.clone(),
        timeframe: last.timeframe,
        level_kind,
        current_price: last.close,
        reaction,
        price_movement: movement,
        created_on: last.date,
        focus,
        status: None,
    })
}

/// The support-side rule table. `holding` is the side price sits on while
/// the focus holds (Above for support); `crossing` is the far side. The
/// resistance table is the same with the sides swapped.
fn classify_movement(
    pm: [PriceMovement; PRICE_DATA_WINDOW],
    holding: PriceMovement,
    crossing: PriceMovement,
) -> ReactionKind {
    let held = pm.iter().filter(|m| **m == holding).count();
    let crossed = pm.iter().filter(|m| **m == crossing).count();
    let [first, second, third, fourth] = pm;

    if held == 0 && crossed == 0 {
        return ReactionKind::Chop;
    }
    if crossed == 0 {
        return ReactionKind::Reversal;
    }
    if first == holding && third == crossing && fourth == crossing {
        return ReactionKind::Break;
    }
    if first == holding && second == holding && third == holding && fourth == crossing {
        return ReactionKind::Break;
    }
    if first == holding && crossed > 0 && fourth == holding {
        return ReactionKind::Reversal;
    }
    if pm == [holding, crossing, holding, crossing] {
        return ReactionKind::Chop;
    }
    ReactionKind::Chop
}
