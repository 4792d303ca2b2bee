use std::sync::Arc;

use crate::application::snapshots::ring::RingBuffer;
use crate::domain::errors::BuildError;
use crate::domain::market::candle::Candlestick;
use crate::domain::market::imbalance::Imbalance;

pub const DEFAULT_IMBALANCE_CAPACITY: usize = 100;

/// Tracked displacement zones for one market.
#[derive(Debug)]
pub struct ImbalanceSnapshot {
    ring: RingBuffer<Arc<Imbalance>>,
}

impl ImbalanceSnapshot {
    pub fn new(size: usize) -> Result<Self, BuildError> {
        Ok(Self {
            ring: RingBuffer::new(size)?,
        })
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_IMBALANCE_CAPACITY).expect("default capacity is nonzero")
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn add(&self, imbalance: Arc<Imbalance>) {
        self.ring.add(imbalance);
    }

    pub fn last(&self) -> Option<Arc<Imbalance>> {
        self.ring.last()
    }

    /// Dispatches a closed candle to every tracked zone so purges and
    /// invalidations can progress.
    pub fn update(&self, candle: &Candlestick) {
        self.ring.for_each(|imbalance| imbalance.update(candle));
    }

    /// Zones qualifying under `pred` for the given candle, newest first.
    pub fn filter(
        &self,
        candle: &Candlestick,
        pred: impl Fn(&Candlestick, &Arc<Imbalance>) -> bool,
    ) -> Vec<Arc<Imbalance>> {
        let mut matched = self.ring.filter(|imbalance| pred(candle, imbalance));
        matched.reverse();
        matched
    }
}
