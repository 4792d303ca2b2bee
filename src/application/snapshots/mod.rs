pub mod candles;
pub mod imbalances;
pub mod levels;
pub mod ring;
pub mod sessions;
pub mod vwaps;

pub use candles::CandleSnapshot;
pub use imbalances::ImbalanceSnapshot;
pub use levels::LevelSnapshot;
pub use ring::RingBuffer;
pub use sessions::SessionSnapshot;
pub use vwaps::VwapSnapshot;
