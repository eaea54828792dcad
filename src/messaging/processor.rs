//! # Queue Processor
//!
//! Polls the inbound queue and turns every received message into a [`QueueJob`]
//! submitted to the worker pool. Messages the pool does not accept within the
//! submit timeout stay on the queue and are redelivered by it later.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{QueueMessage, QueueProvider};
use crate::config::QueueConfig;
use crate::error::Result;
use crate::jobs::{MessageHandler, QueueJob};
use crate::runbook::ResultDelivery;
use crate::worker_pool::WorkerPool;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub owner_id: String,
    pub batch_size: usize,
    pub submit_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            owner_id: String::new(),
            batch_size: 10,
            submit_timeout: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl ProcessorConfig {
    pub fn from_queue_config(owner_id: impl Into<String>, queue: &QueueConfig) -> Self {
        Self {
            owner_id: owner_id.into(),
            batch_size: queue.batch_size(),
            submit_timeout: queue.submit_timeout(),
            ..Self::default()
        }
    }

    /// Delay after `failures` consecutive receive errors
    fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Default)]
struct ProcessorCounters {
    received: AtomicU64,
    submitted: AtomicU64,
    left_on_queue: AtomicU64,
}

pub struct QueueProcessor {
    shared: Arc<Shared>,
    shutdown: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

struct Shared {
    config: ProcessorConfig,
    provider: Arc<dyn QueueProvider>,
    handler: Arc<dyn MessageHandler>,
    pool: Arc<WorkerPool>,
    delivery: Arc<ResultDelivery>,
    counters: ProcessorCounters,
}

impl QueueProcessor {
    pub fn new(
        config: ProcessorConfig,
        provider: Arc<dyn QueueProvider>,
        handler: Arc<dyn MessageHandler>,
        pool: Arc<WorkerPool>,
        delivery: Arc<ResultDelivery>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                provider,
                handler,
                pool,
                delivery,
                counters: ProcessorCounters::default(),
            }),
            shutdown: CancellationToken::new(),
            handle: Mutex::new(None),
        }
    }

    /// Start polling. Calling it again while polling is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return;
        }
        info!(
            queue = self.shared.provider.name(),
            batch_size = self.shared.config.batch_size,
            "🚀 PROCESSOR: Queue polling started"
        );
        *handle = Some(tokio::spawn(poll(
            self.shared.clone(),
            self.shutdown.clone(),
        )));
    }

    /// Stop polling, then stop the pool (running every accepted job), then drain
    /// result delivery.
    #[instrument(skip(self), fields(queue = self.shared.provider.name()))]
    pub async fn stop(&self) -> Result<()> {
        self.shutdown.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("❌ PROCESSOR: Polling task failed: {}", e);
            }
        }

        let pool_result = self.shared.pool.stop().await;
        self.shared.delivery.shutdown().await;

        info!(
            received = self.received(),
            submitted = self.submitted(),
            "🛑 PROCESSOR: Queue processing stopped"
        );
        Ok(pool_result?)
    }

    pub fn received(&self) -> u64 {
        self.shared.counters.received.load(Ordering::Relaxed)
    }

    pub fn submitted(&self) -> u64 {
        self.shared.counters.submitted.load(Ordering::Relaxed)
    }

    /// Messages the pool did not accept
    pub fn left_on_queue(&self) -> u64 {
        self.shared.counters.left_on_queue.load(Ordering::Relaxed)
    }
}

impl Drop for QueueProcessor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn poll(shared: Arc<Shared>, shutdown: CancellationToken) {
    let mut failures: u32 = 0;

    loop {
        let received = tokio::select! {
            _ = shutdown.cancelled() => break,
            received = shared.provider.receive(shared.config.batch_size) => received,
        };

        let messages = match received {
            Ok(messages) => {
                failures = 0;
                messages
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = shared.config.backoff(failures);
                warn!(
                    failures,
                    "⚠️ PROCESSOR: Could not receive messages, retrying in {:?}: {}", delay, e
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(delay) => continue,
                }
            }
        };

        if !messages.is_empty() {
            debug!("PROCESSOR: Received {} messages", messages.len());
        }
        for message in messages {
            shared.counters.received.fetch_add(1, Ordering::Relaxed);
            submit(&shared, message).await;
        }
    }
}

async fn submit(shared: &Shared, message: QueueMessage) {
    let message_id = message.message_id.clone();
    let job = Arc::new(QueueJob::new(
        message,
        shared.config.owner_id.clone(),
        shared.provider.clone(),
        shared.handler.clone(),
        shared.delivery.clone(),
    ));

    match shared
        .pool
        .submit_timeout(job, shared.config.submit_timeout)
        .await
    {
        Ok(true) => {
            shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(false) => {
            shared.counters.left_on_queue.fetch_add(1, Ordering::Relaxed);
            warn!(
                "⚠️ PROCESSOR: Message[{}] was not accepted by the pool, leaving it on the queue",
                message_id
            );
        }
        Err(e) => {
            shared.counters.left_on_queue.fetch_add(1, Ordering::Relaxed);
            error!("❌ PROCESSOR: Message[{}] could not be submitted: {}", message_id, e);
        }
    }
}
