//! Typed request/response contracts served by each market's tracker.
//!
//! Every request carries a single-shot responder: the servicing side writes
//! exactly once (dropping the sender closes the channel), and the requester
//! must not retain the channel after the read. Responses are point-in-time
//! copies, never live references into tracker state.

use chrono::DateTime;
use chrono_tz::Tz;
use tokio::sync::oneshot;

use crate::domain::market::candle::{CandleMetadata, Candlestick};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::market::vwap::VwapEntry;
use crate::domain::signals::MarketSkew;

#[derive(Debug)]
pub struct CandleMetadataRequest {
    pub market: String,
    pub timeframe: Timeframe,
    pub respond_to: oneshot::Sender<Option<CandleMetadata>>,
}

#[derive(Debug)]
pub struct PriceDataRequest {
    pub market: String,
    pub timeframe: Timeframe,
    pub count: usize,
    pub respond_to: oneshot::Sender<Vec<Candlestick>>,
}

#[derive(Debug)]
pub struct AverageVolumeRequest {
    pub market: String,
    pub timeframe: Timeframe,
    pub count: usize,
    pub respond_to: oneshot::Sender<Option<f64>>,
}

#[derive(Debug)]
pub struct VwapRequest {
    pub market: String,
    pub timeframe: Timeframe,
    pub at: DateTime<Tz>,
    pub respond_to: oneshot::Sender<Option<VwapEntry>>,
}

#[derive(Debug)]
pub struct VwapDataRequest {
    pub market: String,
    pub timeframe: Timeframe,
    pub respond_to: oneshot::Sender<Vec<VwapEntry>>,
}

#[derive(Debug)]
pub struct MarketSkewRequest {
    pub market: String,
    pub respond_to: oneshot::Sender<MarketSkew>,
}

/// Union of the requests a tracker services. All are market-scoped; the
/// bus routes on the market field.
#[derive(Debug)]
pub enum MarketRequest {
    CandleMetadata(CandleMetadataRequest),
    PriceData(PriceDataRequest),
    AverageVolume(AverageVolumeRequest),
    Vwap(VwapRequest),
    VwapData(VwapDataRequest),
    MarketSkew(MarketSkewRequest),
}

impl MarketRequest {
    pub fn market(&self) -> &str {
        match self {
            MarketRequest::CandleMetadata(r) => &r.market,
            MarketRequest::PriceData(r) => &r.market,
            MarketRequest::AverageVolume(r) => &r.market,
            MarketRequest::Vwap(r) => &r.market,
            MarketRequest::VwapData(r) => &r.market,
            MarketRequest::MarketSkew(r) => &r.market,
        }
    }
}
