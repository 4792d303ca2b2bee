pub mod bus;
pub mod dispatcher;
pub mod signal_engine;
pub mod snapshots;
pub mod system;
pub mod tracker;
pub mod vwap_engine;
pub mod warmup;
