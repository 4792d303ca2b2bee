use chrono::DateTime;
use chrono_tz::Tz;
use std::fmt;
use tokio::sync::mpsc;

use crate::domain::market::candle::ProcessStatus;
use crate::domain::market::timeframe::Timeframe;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "long"),
            Direction::Short => write!(f, "short"),
        }
    }
}

/// Aggregate positional bias reported by the position manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MarketSkew {
    #[default]
    Neutral,
    Long,
    Short,
}

impl MarketSkew {
    pub fn agrees_with(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (MarketSkew::Long, Direction::Long) | (MarketSkew::Short, Direction::Short)
        )
    }

    pub fn opposes(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (MarketSkew::Long, Direction::Short) | (MarketSkew::Short, Direction::Long)
        )
    }
}

/// Raised when a frozen session extremum becomes a candidate level.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelSignal {
    pub market: String,
    pub price: f64,
}

/// Asks the dispatcher's catch-up workers to backfill a market/timeframe
/// from `start` through now.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchUpSignal {
    pub market: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Tz>,
}

/// Proposed position entry, handed to the position manager.
#[derive(Debug, Clone)]
pub struct EntrySignal {
    pub market: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub price: f64,
    pub reasons: Vec<String>,
    pub confluence: u32,
    pub stop_loss: f64,
    pub stop_loss_points_range: f64,
    pub created_on: DateTime<Tz>,
    pub status: Option<mpsc::Sender<ProcessStatus>>,
}

/// Proposed position exit, handed to the position manager.
#[derive(Debug, Clone)]
pub struct ExitSignal {
    pub market: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub price: f64,
    pub reasons: Vec<String>,
    pub confluence: u32,
    pub created_on: DateTime<Tz>,
    pub status: Option<mpsc::Sender<ProcessStatus>>,
}
