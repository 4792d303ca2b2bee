use chrono::DateTime;
use chrono_tz::Tz;

use crate::application::snapshots::ring::RingBuffer;
use crate::domain::errors::BuildError;
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::trend::{self, Trend};
use crate::domain::market::vwap::VwapEntry;

/// Default rolling depth: a full New-York day of 5m bars with headroom.
pub const DEFAULT_VWAP_CAPACITY: usize = 120;

/// Rolling store of VWAP observations for one (market, timeframe) stream.
#[derive(Debug)]
pub struct VwapSnapshot {
    timeframe: Timeframe,
    ring: RingBuffer<VwapEntry>,
}

impl VwapSnapshot {
    pub fn new(timeframe: Timeframe, size: usize) -> Result<Self, BuildError> {
        Ok(Self {
            timeframe,
            ring: RingBuffer::new(size)?,
        })
    }

    pub fn with_default_capacity(timeframe: Timeframe) -> Self {
        Self::new(timeframe, DEFAULT_VWAP_CAPACITY).expect("default capacity is nonzero")
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn add(&self, entry: VwapEntry) {
        self.ring.add(entry);
    }

    pub fn last(&self) -> Option<VwapEntry> {
        self.ring.last()
    }

    pub fn last_n(&self, n: usize) -> Vec<VwapEntry> {
        self.ring.last_n(n)
    }

    /// Exact-date lookup.
    pub fn at(&self, date: DateTime<Tz>) -> Option<VwapEntry> {
        self.ring
            .filter(|entry| entry.date == date)
            .into_iter()
            .next()
    }

    /// Regression trend over the last `n` observations.
    pub fn trend(&self, n: usize) -> Trend {
        let values: Vec<f64> = self.ring.last_n(n).iter().map(|e| e.value).collect();
        trend::analyze(&values)
    }
}
