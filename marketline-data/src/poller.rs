//! Periodic Pollers (C4): REST-driven collectors for data types the venues
//! don't stream (funding rate, open interest, LSR ratios, volatility
//! index).
//!
//! Scheduling is drift-free: tick `k+1` is anchored at `tick0 + (k+1) *
//! interval`, never `now + interval`, so a slow tick doesn't push every
//! later tick later (spec §4.4, tested by §8 P8). If a tick's own work is
//! still running when the next tick's deadline arrives, that tick is
//! skipped outright - it is never queued behind the running one.

use crate::error::DataError;
use crate::model::CanonicalRecord;
use async_trait::async_trait;
use marketline_integration::channel::{ChannelTxDroppable, Tx};
use marketline_integration::rate_limit::{Priority, RateLimiter};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{error, warn};

/// One unit of scheduled REST work. Implementations are one per data type
/// (funding rate, open interest, LSR top-position, LSR all-account,
/// volatility index); the order-book snapshot-polling job lives in
/// `marketline-data::books` since it shares state with the delta path.
#[async_trait]
pub trait PollJob: Send + Sync {
    /// Used in logs/metrics; matches the canonical `data_type` subject
    /// segment where applicable (eg/ `"funding_rate"`).
    fn name(&self) -> &'static str;

    /// Perform one tick of work, producing zero or more canonical records.
    /// A transient HTTP/rate-limit failure should be surfaced as an `Err`;
    /// the scheduler applies the retry-with-backoff contract, not the job.
    async fn poll(&self) -> Result<Vec<CanonicalRecord>, DataError>;
}

/// Fixed per-job schedule: interval, optional jitter budget and optional
/// initial delay before the first tick.
#[derive(Debug, Clone)]
pub struct JobSchedule {
    pub interval: Duration,
    pub jitter: Option<Duration>,
    pub initial_delay: Duration,
    /// Capped number of retries within the *current* interval on a
    /// transient failure (spec §4.4 default 3); exhausting retries
    /// records a counter and waits for the next tick rather than
    /// dropping the job.
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl JobSchedule {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            jitter: None,
            initial_delay: Duration::ZERO,
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = Some(jitter);
        self
    }
}

/// Default intervals (spec §4.4).
pub mod defaults {
    use std::time::Duration;

    pub const FUNDING_RATE: Duration = Duration::from_secs(8 * 60 * 60);
    pub const OPEN_INTEREST: Duration = Duration::from_secs(15 * 60);
    pub const LSR: Duration = Duration::from_secs(5 * 60);
    pub const VOLATILITY_INDEX: Duration = Duration::from_secs(60);
    pub const ORDERBOOK_SNAPSHOT: Duration = Duration::from_secs(1);
}

/// Counters a poller loop exposes to the control plane's metrics surface.
#[derive(Debug, Default)]
pub struct JobMetrics {
    pub skipped_ticks: AtomicU64,
    pub retry_exhausted: AtomicU64,
    pub ticks_run: AtomicU64,
}

impl JobMetrics {
    pub fn snapshot(&self) -> JobMetricsSnapshot {
        JobMetricsSnapshot {
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            retry_exhausted: self.retry_exhausted.load(Ordering::Relaxed),
            ticks_run: self.ticks_run.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct JobMetricsSnapshot {
    pub skipped_ticks: u64,
    pub retry_exhausted: u64,
    pub ticks_run: u64,
}

/// Handle to a running poller loop; drop does not stop it, call
/// [`PollerHandle::stop`] so the current tick (if any) finishes first.
pub struct PollerHandle {
    shutdown: Arc<Notify>,
    metrics: Arc<JobMetrics>,
}

impl PollerHandle {
    pub fn metrics(&self) -> Arc<JobMetrics> {
        self.metrics.clone()
    }

    pub fn stop(&self) {
        self.shutdown.notify_one();
    }
}

/// Spawn a job's scheduling loop, emitting every record it produces onto
/// `tx`. `rate_limiter` is the venue's shared token bucket (spec §4.4
/// "share this budget across symbols for the same venue"); when the bucket
/// is exhausted the tick is skipped, not queued.
pub fn spawn<J, T>(
    job: J,
    schedule: JobSchedule,
    rate_limiter: Option<(RateLimiter, Priority)>,
    tx: ChannelTxDroppable<T>,
) -> PollerHandle
where
    J: PollJob + 'static,
    T: Tx<Item = CanonicalRecord> + Send + 'static,
{
    let shutdown = Arc::new(Notify::new());
    let metrics = Arc::new(JobMetrics::default());

    let handle = PollerHandle {
        shutdown: shutdown.clone(),
        metrics: metrics.clone(),
    };

    tokio::spawn(run_loop(job, schedule, rate_limiter, tx, shutdown, metrics));

    handle
}

async fn run_loop<J, T>(
    job: J,
    schedule: JobSchedule,
    rate_limiter: Option<(RateLimiter, Priority)>,
    mut tx: ChannelTxDroppable<T>,
    shutdown: Arc<Notify>,
    metrics: Arc<JobMetrics>,
) where
    J: PollJob,
    T: Tx<Item = CanonicalRecord> + Send + 'static,
{
    let tick0 = Instant::now() + schedule.initial_delay;
    let mut next_tick_at = tick0;
    let mut tick_number: u64 = 0;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.notified() => {
                return;
            }

            _ = tokio::time::sleep_until(jittered(next_tick_at, schedule.jitter)) => {}
        }

        let now = Instant::now();
        if now > next_tick_at + schedule.interval {
            let periods_elapsed = duration_periods(now - next_tick_at, schedule.interval);
            if periods_elapsed > 1 {
                let skipped = periods_elapsed - 1;
                metrics.skipped_ticks.fetch_add(skipped, Ordering::Relaxed);
                warn!(job = job.name(), skipped, "poller fell behind, skipping missed ticks");
            }
            tick_number += periods_elapsed;
        } else {
            tick_number += 1;
        }
        next_tick_at = tick0 + schedule.interval * tick_number as u32;

        if let Some((limiter, priority)) = &rate_limiter {
            let _ = priority;
            if !limiter.try_acquire().await {
                warn!(job = job.name(), "rate limit budget exhausted, skipping this tick");
                continue;
            }
        }

        metrics.ticks_run.fetch_add(1, Ordering::Relaxed);
        run_with_retry(&job, &schedule, &metrics, &mut tx).await;
    }
}

async fn run_with_retry<J, T>(
    job: &J,
    schedule: &JobSchedule,
    metrics: &JobMetrics,
    tx: &mut ChannelTxDroppable<T>,
) where
    J: PollJob,
    T: Tx<Item = CanonicalRecord> + Send + 'static,
{
    let mut attempt = 0;
    loop {
        match job.poll().await {
            Ok(records) => {
                for record in records {
                    tx.send(record);
                }
                return;
            }
            Err(error) => {
                attempt += 1;
                if attempt > schedule.max_retries {
                    metrics.retry_exhausted.fetch_add(1, Ordering::Relaxed);
                    error!(job = job.name(), %error, attempt, "poller exhausted retries for this tick, continuing at next tick");
                    return;
                }
                warn!(job = job.name(), %error, attempt, "poller tick failed, retrying within interval");
                tokio::time::sleep(schedule.retry_backoff * attempt).await;
            }
        }
    }
}

fn duration_periods(elapsed: Duration, period: Duration) -> u64 {
    if period.is_zero() {
        return 1;
    }
    (elapsed.as_nanos() / period.as_nanos().max(1)) as u64
}

fn jittered(deadline: Instant, jitter: Option<Duration>) -> Instant {
    match jitter {
        Some(jitter) if !jitter.is_zero() => {
            let ms = jitter.as_millis() as u64;
            let offset = rand::random::<u64>() % ms.max(1);
            deadline + Duration::from_millis(offset)
        }
        _ => deadline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketline_integration::channel::mpsc_unbounded;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{Duration, advance, pause};

    struct CountingJob {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PollJob for CountingJob {
        fn name(&self) -> &'static str {
            "counting_job"
        }

        async fn poll(&self) -> Result<Vec<CanonicalRecord>, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_fire_at_drift_free_intervals() {
        pause();
        let calls = Arc::new(AtomicUsize::new(0));
        let job = CountingJob { calls: calls.clone() };
        let (tx, _rx) = mpsc_unbounded::<CanonicalRecord>();
        let tx = ChannelTxDroppable::new(tx);

        let schedule = JobSchedule::fixed(Duration::from_secs(10));
        let handle = spawn(job, schedule, None, tx);

        advance(Duration::from_secs(35)).await;
        tokio::task::yield_now().await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        handle.stop();
    }

    struct FailingJob {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl PollJob for FailingJob {
        fn name(&self) -> &'static str {
            "failing_job"
        }

        async fn poll(&self) -> Result<Vec<CanonicalRecord>, DataError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DataError::Config("simulated failure".into()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_counted_and_job_continues() {
        pause();
        let calls = Arc::new(AtomicUsize::new(0));
        let job = FailingJob { calls: calls.clone() };
        let (tx, _rx) = mpsc_unbounded::<CanonicalRecord>();
        let tx = ChannelTxDroppable::new(tx);

        let mut schedule = JobSchedule::fixed(Duration::from_secs(10));
        schedule.max_retries = 2;
        schedule.retry_backoff = Duration::from_millis(1);
        let handle = spawn(job, schedule, None, tx);

        advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        let snapshot = handle.metrics().snapshot();
        assert_eq!(snapshot.retry_exhausted, 1);
        assert!(calls.load(Ordering::SeqCst) >= 3);
        handle.stop();
    }
}
