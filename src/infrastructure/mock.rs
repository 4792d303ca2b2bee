//! In-memory collaborators for tests and for running without a live
//! position manager.

use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::ports::{CandleRecord, Job, JobScheduler, MarketDataClient, SkewProvider};
use crate::domain::market::timeframe::Timeframe;
use crate::domain::signals::MarketSkew;

/// Market data client that serves scripted record batches in order and
/// records every fetch it saw.
pub struct ScriptedMarketData {
    batches: Mutex<Vec<Vec<CandleRecord>>>,
    calls: Mutex<Vec<(String, Timeframe)>>,
}

impl ScriptedMarketData {
    pub fn new(batches: Vec<Vec<CandleRecord>>) -> Self {
        Self {
            batches: Mutex::new(batches),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn calls(&self) -> Vec<(String, Timeframe)> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl MarketDataClient for ScriptedMarketData {
    async fn fetch_index_intraday_historical(
        &self,
        market: &str,
        timeframe: Timeframe,
        _from: DateTime<Tz>,
        _to: Option<DateTime<Tz>>,
    ) -> Result<Vec<CandleRecord>> {
        self.calls
            .lock()
            .expect("mock lock poisoned")
            .push((market.to_string(), timeframe));
        let mut batches = self.batches.lock().expect("mock lock poisoned");
        if batches.is_empty() {
            return Ok(Vec::new());
        }
        Ok(batches.remove(0))
    }
}

/// Skew provider pinned to one answer.
pub struct StaticSkew(pub MarketSkew);

#[async_trait]
impl SkewProvider for StaticSkew {
    async fn market_skew(&self, _market: &str) -> MarketSkew {
        self.0
    }
}

/// Scheduler double: registrations are recorded, never ticked on a clock.
/// Tests drive jobs explicitly with [`ImmediateScheduler::fire_all`].
pub struct ImmediateScheduler {
    jobs: Mutex<HashMap<String, (Uuid, Job)>>,
}

impl ImmediateScheduler {
    pub fn inert() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().expect("mock lock poisoned").len()
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs
            .lock()
            .expect("mock lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Runs every registered job once, immediately.
    pub async fn fire_all(&self) {
        let jobs: Vec<Job> = self
            .jobs
            .lock()
            .expect("mock lock poisoned")
            .values()
            .map(|(_, job)| Job::clone(job))
            .collect();
        for job in jobs {
            job().await;
        }
    }
}

impl JobScheduler for ImmediateScheduler {
    fn register(
        &self,
        name: &str,
        _interval: std::time::Duration,
        _start_at: DateTime<Tz>,
        job: Job,
    ) -> Uuid {
        let mut jobs = self.jobs.lock().expect("mock lock poisoned");
        if let Some((id, _)) = jobs.get(name) {
            return *id;
        }
        let id = Uuid::new_v4();
        jobs.insert(name.to_string(), (id, job));
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::America::New_York;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_scripted_batches_serve_in_order() {
        let record = CandleRecord {
            open: 1.0,
            close: 2.0,
            high: 3.0,
            low: 0.5,
            volume: 10.0,
            date: "2024-03-04 09:30:00".to_string(),
        };
        let client = ScriptedMarketData::new(vec![vec![record.clone()], vec![]]);
        let from = New_York.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();

        let first = client
            .fetch_index_intraday_historical("^NDX", Timeframe::FiveMin, from, None)
            .await
            .unwrap();
        assert_eq!(first, vec![record]);

        let second = client
            .fetch_index_intraday_historical("^NDX", Timeframe::FiveMin, from, None)
            .await
            .unwrap();
        assert!(second.is_empty());
        assert_eq!(client.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_registration_is_idempotent() {
        let scheduler = ImmediateScheduler::inert();
        let fired = Arc::new(AtomicUsize::new(0));
        let start = New_York.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();

        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            let id = scheduler.register(
                "fetchMarketData/^NDX/5m",
                std::time::Duration::from_secs(305),
                start,
                Arc::new(move || {
                    let fired = Arc::clone(&fired);
                    Box::pin(async move {
                        fired.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            );
            let _ = id;
        }

        assert_eq!(scheduler.job_count(), 1);
        scheduler.fire_all().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
