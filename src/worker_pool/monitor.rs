//! # Pool Monitoring
//!
//! Lock-free counters updated by workers and submitters, and the [`PoolMetrics`]
//! snapshot the scaling engine evaluates once per monitoring period.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolMetrics {
    pub current_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    /// Jobs accepted but not yet picked up by a worker
    pub queued_jobs: usize,
    /// Jobs currently executing
    pub active_jobs: usize,
    pub submitted: u64,
    pub rejected: u64,
    pub executed: u64,
    pub failed: u64,
}

impl PoolMetrics {
    /// Share of queue capacity in use (0.0-1.0)
    pub fn queue_fill(&self) -> f64 {
        if self.queue_capacity == 0 {
            return 0.0;
        }
        (self.queued_jobs as f64 / self.queue_capacity as f64).min(1.0)
    }
}

#[derive(Debug)]
pub struct PoolMonitor {
    min_workers: usize,
    max_workers: usize,
    queue_capacity: usize,
    current_workers: AtomicUsize,
    queued_jobs: AtomicUsize,
    active_jobs: AtomicUsize,
    submitted: AtomicU64,
    rejected: AtomicU64,
    executed: AtomicU64,
    failed: AtomicU64,
}

impl PoolMonitor {
    pub fn new(min_workers: usize, max_workers: usize, queue_capacity: usize) -> Self {
        Self {
            min_workers,
            max_workers,
            queue_capacity,
            current_workers: AtomicUsize::new(0),
            queued_jobs: AtomicUsize::new(0),
            active_jobs: AtomicUsize::new(0),
            submitted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Counted before the job is handed to the queue so a worker never sees it first
    pub fn job_enqueued(&self) {
        self.queued_jobs.fetch_add(1, Ordering::AcqRel);
    }

    /// The queue refused a job counted by [`job_enqueued`](Self::job_enqueued)
    pub fn job_withdrawn(&self) {
        self.queued_jobs.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker dequeued a job and is about to run it
    pub fn record_started(&self) {
        let _ = self
            .queued_jobs
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(1))
            });
        self.active_jobs.fetch_add(1, Ordering::AcqRel);
    }

    pub fn record_finished(&self, success: bool) {
        self.active_jobs.fetch_sub(1, Ordering::AcqRel);
        self.executed.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn worker_added(&self) -> usize {
        self.current_workers.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn worker_removed(&self) -> usize {
        self.current_workers.fetch_sub(1, Ordering::AcqRel) - 1
    }

    pub fn reset_workers(&self) {
        self.current_workers.store(0, Ordering::Release);
    }

    pub fn current_workers(&self) -> usize {
        self.current_workers.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> PoolMetrics {
        PoolMetrics {
            current_workers: self.current_workers.load(Ordering::Acquire),
            min_workers: self.min_workers,
            max_workers: self.max_workers,
            queue_capacity: self.queue_capacity,
            queued_jobs: self.queued_jobs.load(Ordering::Acquire),
            active_jobs: self.active_jobs.load(Ordering::Acquire),
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            executed: self.executed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_accounting() {
        let monitor = PoolMonitor::new(2, 4, 10);
        monitor.worker_added();
        monitor.worker_added();
        monitor.job_enqueued();
        monitor.record_submitted();
        monitor.job_enqueued();
        monitor.record_submitted();
        monitor.job_enqueued();
        monitor.job_withdrawn();
        monitor.record_rejected();
        monitor.record_started();

        let metrics = monitor.snapshot();
        assert_eq!(metrics.current_workers, 2);
        assert_eq!(metrics.queued_jobs, 1);
        assert_eq!(metrics.active_jobs, 1);
        assert_eq!(metrics.submitted, 2);
        assert_eq!(metrics.rejected, 1);
        assert_eq!(metrics.queue_fill(), 0.1);

        monitor.record_finished(false);
        let metrics = monitor.snapshot();
        assert_eq!(metrics.active_jobs, 0);
        assert_eq!(metrics.executed, 1);
        assert_eq!(metrics.failed, 1);
    }

    #[test]
    fn test_started_never_underflows_queue() {
        let monitor = PoolMonitor::new(1, 1, 1);
        monitor.record_started();
        assert_eq!(monitor.snapshot().queued_jobs, 0);
    }
}
