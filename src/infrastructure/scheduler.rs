use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::mem;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::ports::{Job, JobScheduler};

/// Tokio-backed scheduler: each registered job sleeps until its start
/// time, then ticks on a fixed interval until shutdown. One instance is
/// shared per process; registration is idempotent per job name.
///
/// Must be constructed inside a tokio runtime.
pub struct TokioScheduler {
    jobs: Mutex<HashMap<String, Uuid>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl TokioScheduler {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            jobs: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    pub fn job_count(&self) -> usize {
        self.jobs.lock().expect("scheduler lock poisoned").len()
    }

    /// Stops every job loop and waits for each task to finish. Jobs
    /// mid-tick finish their current run before this returns.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks = mem::take(&mut *self.tasks.lock().expect("scheduler lock poisoned"));
        for task in tasks {
            let _ = task.await;
        }
        info!("scheduler stopped");
    }
}

impl Default for TokioScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler for TokioScheduler {
    fn register(
        &self,
        name: &str,
        interval: Duration,
        start_at: DateTime<Tz>,
        job: Job,
    ) -> Uuid {
        let mut jobs = self.jobs.lock().expect("scheduler lock poisoned");
        if let Some(existing) = jobs.get(name) {
            debug!(job = name, "already registered");
            return *existing;
        }

        let id = Uuid::new_v4();
        jobs.insert(name.to_string(), id);

        let mut shutdown = self.shutdown_tx.subscribe();
        let job_name = name.to_string();
        info!(job = %job_name, %start_at, interval_secs = interval.as_secs(), "job registered");

        let task = tokio::spawn(async move {
            let lead_in = (start_at.with_timezone(&Utc) - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = shutdown.changed() => return,
                _ = tokio::time::sleep(lead_in) => {}
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        debug!(job = %job_name, "job loop stopped");
                        return;
                    }
                    _ = ticker.tick() => job().await,
                }
            }
        });
        self.tasks
            .lock()
            .expect("scheduler lock poisoned")
            .push(task);
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: Arc<AtomicUsize>) -> Job {
        Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_ticks_on_interval() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let start = Utc::now().with_timezone(&New_York);

        scheduler.register(
            "tick",
            Duration::from_secs(60),
            start,
            counting_job(Arc::clone(&fired)),
        );

        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(fired.load(Ordering::SeqCst) >= 2);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_registration_returns_same_id() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let start = Utc::now().with_timezone(&New_York);

        let a = scheduler.register(
            "once",
            Duration::from_secs(60),
            start,
            counting_job(Arc::clone(&fired)),
        );
        let b = scheduler.register(
            "once",
            Duration::from_secs(60),
            start,
            counting_job(Arc::clone(&fired)),
        );
        assert_eq!(a, b);
        assert_eq!(scheduler.job_count(), 1);
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_ticking() {
        let scheduler = TokioScheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let start = Utc::now().with_timezone(&New_York);

        scheduler.register(
            "stop",
            Duration::from_secs(60),
            start,
            counting_job(Arc::clone(&fired)),
        );
        tokio::time::sleep(Duration::from_secs(61)).await;
        // Shutdown returns only after every job task has been joined.
        scheduler.shutdown().await;
        let seen = fired.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(300)).await;
        assert_eq!(fired.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_job_mid_tick() {
        let scheduler = TokioScheduler::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let start = Utc::now().with_timezone(&New_York);

        // A job whose tick takes a while to complete.
        let finished_counter = Arc::clone(&finished);
        scheduler.register(
            "slow",
            Duration::from_secs(60),
            start,
            Arc::new(move || {
                let finished = Arc::clone(&finished_counter);
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        // Let the first tick begin, then shut down mid-tick.
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.shutdown().await;
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
