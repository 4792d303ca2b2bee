use std::sync::Arc;

use crate::application::snapshots::ring::RingBuffer;
use crate::domain::errors::BuildError;
use crate::domain::market::candle::Candlestick;
use crate::domain::market::level::Level;

pub const DEFAULT_LEVEL_CAPACITY: usize = 80;

/// Tracked support/resistance levels for one market.
#[derive(Debug)]
pub struct LevelSnapshot {
    ring: RingBuffer<Arc<Level>>,
}

impl LevelSnapshot {
    pub fn new(size: usize) -> Result<Self, BuildError> {
        Ok(Self {
            ring: RingBuffer::new(size)?,
        })
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_LEVEL_CAPACITY).expect("default capacity is nonzero")
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn add(&self, level: Arc<Level>) {
        self.ring.add(level);
    }

    /// Dispatches a closed candle to every tracked level so pending breaks
    /// can confirm.
    pub fn update(&self, candle: &Candlestick) {
        self.ring.for_each(|level| level.update(candle));
    }

    /// Levels still in play, oldest first.
    pub fn active(&self) -> Vec<Arc<Level>> {
        self.ring.filter(|level| !level.is_invalidated())
    }

    /// True when a tracked, still-active level already sits within
    /// `epsilon` of `price`.
    pub fn exists_near(&self, price: f64, epsilon: f64) -> bool {
        !self
            .ring
            .filter(|level| !level.is_invalidated() && (level.price - price).abs() <= epsilon)
            .is_empty()
    }
}
