//! # Worker Pool Lifecycle
//!
//! Workers are tokio tasks sharing one bounded job queue. The pool owns the queue
//! sender; stopping the pool drops it, so workers drain every accepted job before
//! they observe the closed queue and exit.

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::config::{PoolConfiguration, PoolSettings};
use super::monitor::{PoolMetrics, PoolMonitor};
use super::scaling::{ScalingAction, ScalingEngine};
use super::{Job, WorkerPoolError};

type QueuedJob = Arc<dyn Job>;

/// Pool lifecycle: `Created -> Running -> Stopped`, never restarted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Created,
    Running,
    Stopped,
}

pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    id: Uuid,
    settings: PoolSettings,
    state: Mutex<PoolState>,
    sender: Mutex<Option<mpsc::Sender<QueuedJob>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<QueuedJob>>,
    /// Workers the monitor wants gone and not yet claimed by one
    retire_budget: AtomicUsize,
    retire_signal: Notify,
    monitor: PoolMonitor,
    workers: Mutex<Vec<JoinHandle<()>>>,
    next_worker_id: AtomicUsize,
    shutdown: CancellationToken,
    monitor_handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(configuration: PoolConfiguration) -> Self {
        Self::with_settings(configuration.normalize())
    }

    pub fn with_settings(settings: PoolSettings) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity);
        let id = Uuid::new_v4();

        info!(
            "🏊 POOL: Creating worker pool {} (min: {}, max: {}, queue: {})",
            id, settings.min_workers, settings.max_workers, settings.queue_capacity
        );

        Self {
            inner: Arc::new(PoolInner {
                id,
                settings,
                state: Mutex::new(PoolState::Created),
                sender: Mutex::new(Some(sender)),
                receiver: tokio::sync::Mutex::new(receiver),
                retire_budget: AtomicUsize::new(0),
                retire_signal: Notify::new(),
                monitor: PoolMonitor::new(
                    settings.min_workers,
                    settings.max_workers,
                    settings.queue_capacity,
                ),
                workers: Mutex::new(Vec::new()),
                next_worker_id: AtomicUsize::new(1),
                shutdown: CancellationToken::new(),
                monitor_handle: Mutex::new(None),
            }),
        }
    }

    /// Spawn `min_workers` workers and the monitor. Requires a tokio runtime.
    #[instrument(skip(self), fields(pool_id = %self.inner.id))]
    pub async fn start(&self) -> Result<(), WorkerPoolError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                PoolState::Running => return Err(WorkerPoolError::AlreadyRunning),
                PoolState::Stopped => return Err(WorkerPoolError::AlreadyStopped),
                PoolState::Created => *state = PoolState::Running,
            }
        }

        for _ in 0..self.inner.settings.min_workers {
            self.inner.spawn_worker();
        }

        let monitor = tokio::spawn(run_monitor(self.inner.clone()));
        *self.inner.monitor_handle.lock() = Some(monitor);

        info!(
            "🚀 POOL: Worker pool started with {} workers",
            self.inner.monitor.current_workers()
        );
        Ok(())
    }

    /// Offer a job without blocking. `Ok(false)` when the queue is full or the
    /// pool is not running.
    pub fn submit(&self, job: QueuedJob) -> Result<bool, WorkerPoolError> {
        let Some(sender) = self.inner.running_sender() else {
            self.inner.monitor.record_rejected();
            return Ok(false);
        };

        self.inner.monitor.job_enqueued();
        match sender.try_send(job) {
            Ok(()) => {
                self.inner.monitor.record_submitted();
                Ok(true)
            }
            Err(TrySendError::Full(job)) => {
                self.inner.monitor.job_withdrawn();
                self.inner.monitor.record_rejected();
                debug!(job_id = job.id(), "POOL: Queue is full, job rejected");
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => {
                self.inner.monitor.job_withdrawn();
                Err(WorkerPoolError::Closed)
            }
        }
    }

    /// Offer a job, waiting up to `timeout` for queue space
    pub async fn submit_timeout(
        &self,
        job: QueuedJob,
        timeout: Duration,
    ) -> Result<bool, WorkerPoolError> {
        let Some(sender) = self.inner.running_sender() else {
            self.inner.monitor.record_rejected();
            return Ok(false);
        };

        self.inner.monitor.job_enqueued();
        match sender.send_timeout(job, timeout).await {
            Ok(()) => {
                self.inner.monitor.record_submitted();
                Ok(true)
            }
            Err(SendTimeoutError::Timeout(job)) => {
                self.inner.monitor.job_withdrawn();
                self.inner.monitor.record_rejected();
                debug!(
                    job_id = job.id(),
                    "POOL: Queue stayed full for {:?}, job rejected", timeout
                );
                Ok(false)
            }
            Err(SendTimeoutError::Closed(_)) => {
                self.inner.monitor.job_withdrawn();
                Err(WorkerPoolError::Closed)
            }
        }
    }

    /// Stop accepting jobs, wait for every accepted job to finish, then join all
    /// workers and the monitor.
    #[instrument(skip(self), fields(pool_id = %self.inner.id))]
    pub async fn stop(&self) -> Result<(), WorkerPoolError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                PoolState::Created => return Err(WorkerPoolError::NotRunning),
                PoolState::Stopped => return Err(WorkerPoolError::AlreadyStopped),
                PoolState::Running => *state = PoolState::Stopped,
            }
        }

        info!("🛑 POOL: Stopping worker pool");

        // monitor first, so the worker set is final before it is joined
        self.inner.shutdown.cancel();
        let monitor = self.inner.monitor_handle.lock().take();
        if let Some(monitor) = monitor {
            if let Err(e) = monitor.await {
                error!("❌ POOL: Monitor task failed: {}", e);
            }
        }

        drop(self.inner.sender.lock().take());

        let workers = std::mem::take(&mut *self.inner.workers.lock());
        for result in join_all(workers).await {
            if let Err(e) = result {
                error!("❌ POOL: Worker task failed: {}", e);
            }
        }
        self.inner.monitor.reset_workers();

        let metrics = self.inner.monitor.snapshot();
        info!(
            "🛑 POOL: Worker pool stopped (executed: {}, failed: {}, rejected: {})",
            metrics.executed, metrics.failed, metrics.rejected
        );
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn state(&self) -> PoolState {
        *self.inner.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state() == PoolState::Running
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.inner.settings
    }

    pub fn current_workers(&self) -> usize {
        self.inner.monitor.current_workers()
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.inner.monitor.snapshot()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // let detached workers drain and exit if the pool was never stopped
        self.inner.shutdown.cancel();
        self.inner.sender.lock().take();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("settings", &self.inner.settings)
            .finish()
    }
}

impl PoolInner {
    fn running_sender(&self) -> Option<mpsc::Sender<QueuedJob>> {
        if *self.state.lock() != PoolState::Running {
            return None;
        }
        self.sender.lock().clone()
    }

    fn spawn_worker(self: &Arc<Self>) {
        let worker_id = self.next_worker_id.fetch_add(1, Ordering::Relaxed);
        let count = self.monitor.worker_added();
        let handle = tokio::spawn(run_worker(self.clone(), worker_id));

        let mut workers = self.workers.lock();
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle);

        debug!(worker_id, workers = count, "POOL: Worker spawned");
    }

    fn retire_worker(&self) {
        let count = self.monitor.worker_removed();
        self.retire_budget.fetch_add(1, Ordering::AcqRel);
        self.retire_signal.notify_waiters();
        debug!(workers = count, "POOL: Worker retirement requested");
    }

    /// Take one unit of the retire budget, if any is left
    fn claim_retirement(&self) -> bool {
        self.retire_budget
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |budget| {
                budget.checked_sub(1)
            })
            .is_ok()
    }

    async fn next_job(&self) -> Option<QueuedJob> {
        self.receiver.lock().await.recv().await
    }
}

async fn run_worker(pool: Arc<PoolInner>, worker_id: usize) {
    loop {
        // registered before the budget check so a request in between still wakes us
        let retire = pool.retire_signal.notified();
        tokio::pin!(retire);
        retire.as_mut().enable();

        if pool.claim_retirement() {
            debug!(worker_id, "POOL: Worker retired");
            return;
        }

        let job = tokio::select! {
            _ = &mut retire => continue,
            job = pool.next_job() => job,
        };

        // queue closed and drained
        let Some(job) = job else {
            debug!(worker_id, "POOL: Worker exiting, queue closed");
            return;
        };

        pool.monitor.record_started();
        let success = match AssertUnwindSafe(job.execute()).catch_unwind().await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(worker_id, job_id = job.id(), "⚠️ POOL: Job failed: {}", e);
                false
            }
            Err(_) => {
                error!(worker_id, job_id = job.id(), "❌ POOL: Job panicked");
                false
            }
        };
        pool.monitor.record_finished(success);
    }
}

async fn run_monitor(pool: Arc<PoolInner>) {
    let mut engine = ScalingEngine::new(&pool.settings);
    let mut ticker = tokio::time::interval(pool.settings.monitoring_period);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = pool.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let metrics = pool.monitor.snapshot();
        debug!(
            workers = metrics.current_workers,
            queued = metrics.queued_jobs,
            active = metrics.active_jobs,
            "POOL: Monitoring cycle"
        );

        match engine.evaluate(&metrics, Instant::now()) {
            ScalingAction::ScaleUp { count } => {
                let room = pool.settings.max_workers.saturating_sub(metrics.current_workers);
                for _ in 0..count.min(room) {
                    pool.spawn_worker();
                }
                info!(
                    "🔼 POOL: Scaled up to {} workers",
                    pool.monitor.current_workers()
                );
            }
            ScalingAction::ScaleDown { count } => {
                let surplus = metrics.current_workers.saturating_sub(pool.settings.min_workers);
                for _ in 0..count.min(surplus) {
                    pool.retire_worker();
                }
                info!(
                    "🔽 POOL: Scaled down to {} workers",
                    pool.monitor.current_workers()
                );
            }
            ScalingAction::NoChange => {}
        }
    }

    debug!("POOL: Monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    struct CountingJob {
        id: String,
        counter: Arc<AtomicU64>,
        delay: Duration,
    }

    #[async_trait]
    impl Job for CountingJob {
        fn id(&self) -> &str {
            &self.id
        }

        async fn execute(&self) -> crate::error::Result<()> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn job(counter: &Arc<AtomicU64>, delay: Duration) -> Arc<dyn Job> {
        Arc::new(CountingJob {
            id: Uuid::new_v4().to_string(),
            counter: counter.clone(),
            delay,
        })
    }

    fn settings(min: usize, max: usize, queue: usize) -> PoolSettings {
        PoolSettings {
            min_workers: min,
            max_workers: max,
            queue_capacity: queue,
            keep_alive: Duration::from_millis(50),
            monitoring_period: Duration::from_millis(20),
        }
    }

    #[tokio::test]
    async fn test_retirements_requested_while_busy_all_take_effect() {
        let pool = WorkerPool::with_settings(PoolSettings {
            monitoring_period: Duration::from_secs(60),
            ..settings(3, 3, 3)
        });
        pool.start().await.unwrap();
        let counter = Arc::new(AtomicU64::new(0));

        for _ in 0..3 {
            assert!(pool.submit(job(&counter, Duration::from_millis(100))).unwrap());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.metrics().active_jobs, 3);

        pool.inner.retire_worker();
        pool.inner.retire_worker();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let live = pool
            .inner
            .workers
            .lock()
            .iter()
            .filter(|worker| !worker.is_finished())
            .count();
        assert_eq!(live, 1);
        assert_eq!(pool.current_workers(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 3);

        pool.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_lifecycle_errors() {
        let pool = WorkerPool::with_settings(settings(1, 1, 1));
        assert_eq!(pool.stop().await, Err(WorkerPoolError::NotRunning));

        pool.start().await.unwrap();
        assert_eq!(pool.start().await, Err(WorkerPoolError::AlreadyRunning));

        pool.stop().await.unwrap();
        assert_eq!(pool.stop().await, Err(WorkerPoolError::AlreadyStopped));
        assert_eq!(pool.start().await, Err(WorkerPoolError::AlreadyStopped));
    }

    #[tokio::test]
    async fn test_submit_before_start_is_rejected() {
        let pool = WorkerPool::with_settings(settings(1, 1, 1));
        let counter = Arc::new(AtomicU64::new(0));
        assert!(!pool.submit(job(&counter, Duration::ZERO)).unwrap());
        assert_eq!(pool.metrics().rejected, 1);
    }

    #[tokio::test]
    async fn test_full_queue_rejects_without_blocking() {
        let pool = WorkerPool::with_settings(settings(1, 1, 1));
        pool.start().await.unwrap();
        let counter = Arc::new(AtomicU64::new(0));

        // one executing, one queued, the rest rejected
        let mut accepted = 0;
        for _ in 0..5 {
            if pool.submit(job(&counter, Duration::from_millis(200))).unwrap() {
                accepted += 1;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(accepted <= 2);

        pool.stop().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), accepted);
    }

    #[tokio::test]
    async fn test_scales_up_under_pressure_and_back_down() {
        let pool = WorkerPool::with_settings(settings(1, 3, 4));
        pool.start().await.unwrap();
        let counter = Arc::new(AtomicU64::new(0));

        for _ in 0..30 {
            let _ = pool
                .submit_timeout(job(&counter, Duration::from_millis(30)), Duration::from_secs(1))
                .await
                .unwrap();
        }
        assert!(pool.metrics().current_workers > 1);
        assert!(pool.current_workers() <= 3);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(pool.current_workers(), 1);

        pool.stop().await.unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 30);
    }
}
