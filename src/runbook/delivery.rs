//! # Result Delivery Stage
//!
//! Jobs hand their results to a bounded queue and return immediately. A dispatcher
//! task sends them with bounded concurrency, retrying retryable failures with
//! exponential backoff. Outcomes are counted and visible through [`ResultDelivery::stats`].

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use super::result::ActionResultPayload;
use super::sender::ResultSender;
use crate::config::DeliveryConfig;

struct Delivery {
    message_id: String,
    payload: ActionResultPayload,
    enqueued_at: Instant,
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub enqueued: u64,
    pub delivered: u64,
    pub failed: u64,
    /// Results refused because the queue was full or closed
    pub dropped: u64,
}

#[derive(Debug, Default)]
struct DeliveryCounters {
    enqueued: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

pub struct ResultDelivery {
    queue: Mutex<Option<mpsc::Sender<Delivery>>>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<DeliveryCounters>,
}

impl ResultDelivery {
    /// Start the dispatcher. Requires a tokio runtime.
    pub fn start(sender: Arc<dyn ResultSender>, config: DeliveryConfig) -> Self {
        let (queue, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let counters = Arc::new(DeliveryCounters::default());

        info!(
            capacity = config.queue_capacity,
            concurrency = config.max_concurrent,
            attempts = config.max_attempts,
            "DELIVERY: Result delivery started"
        );

        let dispatcher = tokio::spawn(dispatch(receiver, sender, config, counters.clone()));
        Self {
            queue: Mutex::new(Some(queue)),
            dispatcher: Mutex::new(Some(dispatcher)),
            counters,
        }
    }

    /// Queue a result without blocking. Returns `false` if it was dropped.
    pub fn enqueue(&self, message_id: &str, payload: ActionResultPayload) -> bool {
        let delivery = Delivery {
            message_id: message_id.to_string(),
            payload,
            enqueued_at: Instant::now(),
        };

        let outcome = match self.queue.lock().as_ref() {
            Some(queue) => queue.try_send(delivery),
            None => Err(TrySendError::Closed(delivery)),
        };

        match outcome {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                let reason = match &e {
                    TrySendError::Full(_) => "queue is full",
                    TrySendError::Closed(_) => "delivery is shut down",
                };
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    message_id,
                    "⚠️ DELIVERY: Result of message[{}] dropped, {}", message_id, reason
                );
                false
            }
        }
    }

    pub fn stats(&self) -> DeliveryStats {
        DeliveryStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting results and wait until every queued result has been handled
    pub async fn shutdown(&self) {
        drop(self.queue.lock().take());
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            if let Err(e) = dispatcher.await {
                error!("❌ DELIVERY: Dispatcher failed: {}", e);
            }
            let stats = self.stats();
            info!(
                delivered = stats.delivered,
                failed = stats.failed,
                dropped = stats.dropped,
                "DELIVERY: Result delivery stopped"
            );
        }
    }
}

impl std::fmt::Debug for ResultDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultDelivery")
            .field("stats", &self.stats())
            .finish()
    }
}

async fn dispatch(
    mut receiver: mpsc::Receiver<Delivery>,
    sender: Arc<dyn ResultSender>,
    config: DeliveryConfig,
    counters: Arc<DeliveryCounters>,
) {
    let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let config = Arc::new(config);
    let mut in_flight = JoinSet::new();

    while let Some(delivery) = receiver.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let sender = sender.clone();
        let config = config.clone();
        let counters = counters.clone();

        in_flight.spawn(async move {
            deliver(delivery, sender.as_ref(), &config, &counters).await;
            drop(permit);
        });

        while let Some(finished) = in_flight.try_join_next() {
            if let Err(e) = finished {
                error!("❌ DELIVERY: Delivery task failed: {}", e);
            }
        }
    }

    while let Some(finished) = in_flight.join_next().await {
        if let Err(e) = finished {
            error!("❌ DELIVERY: Delivery task failed: {}", e);
        }
    }
}

async fn deliver(
    delivery: Delivery,
    sender: &dyn ResultSender,
    config: &DeliveryConfig,
    counters: &DeliveryCounters,
) {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match sender.send(&delivery.payload).await {
            Ok(()) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(
                    message_id = %delivery.message_id,
                    attempt,
                    "DELIVERY: Sent result of message[{}], took {:.3}s",
                    delivery.message_id,
                    delivery.enqueued_at.elapsed().as_secs_f64()
                );
                return;
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let backoff = config.backoff_for(attempt);
                debug!(
                    message_id = %delivery.message_id,
                    attempt,
                    "DELIVERY: Attempt failed, retrying in {:?}: {}", backoff, e
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    message_id = %delivery.message_id,
                    attempt,
                    "⚠️ DELIVERY: Could not send action result[{:?}] of message[{}]: {}",
                    delivery.payload,
                    delivery.message_id,
                    e
                );
                return;
            }
        }
    }
}
