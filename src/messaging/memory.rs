//! In-process queue provider for local runs and tests.
//!
//! Received messages stay in flight until deleted; `redeliver_in_flight` plays the
//! part of a visibility timeout expiring.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

use super::{MessagingError, QueueMessage, QueueProvider};

#[derive(Debug)]
pub struct InMemoryQueueProvider {
    name: String,
    pending: Mutex<VecDeque<QueueMessage>>,
    in_flight: DashMap<String, QueueMessage>,
    arrivals: Notify,
    wait_time: Duration,
    deleted: AtomicU64,
}

impl InMemoryQueueProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_wait_time(name, Duration::from_millis(100))
    }

    /// `wait_time` bounds how long an empty `receive` waits for a message
    pub fn with_wait_time(name: impl Into<String>, wait_time: Duration) -> Self {
        Self {
            name: name.into(),
            pending: Mutex::new(VecDeque::new()),
            in_flight: DashMap::new(),
            arrivals: Notify::new(),
            wait_time,
            deleted: AtomicU64::new(0),
        }
    }

    pub fn push(&self, message: QueueMessage) {
        self.pending.lock().push_back(message);
        self.arrivals.notify_one();
    }

    /// Return every received but undeleted message to the queue
    pub fn redeliver_in_flight(&self) -> usize {
        let keys: Vec<String> = self.in_flight.iter().map(|e| e.key().clone()).collect();
        let mut pending = self.pending.lock();
        let mut count = 0;
        for key in keys {
            if let Some((_, message)) = self.in_flight.remove(&key) {
                pending.push_back(message);
                count += 1;
            }
        }
        drop(pending);
        if count > 0 {
            self.arrivals.notify_one();
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted.load(Ordering::Relaxed)
    }

    fn take_batch(&self, max_messages: usize) -> Vec<QueueMessage> {
        let mut pending = self.pending.lock();
        let count = max_messages.min(pending.len());
        let batch: Vec<QueueMessage> = pending.drain(..count).collect();
        drop(pending);

        for message in &batch {
            self.in_flight
                .insert(message.receipt_handle.clone(), message.clone());
        }
        batch
    }
}

#[async_trait]
impl QueueProvider for InMemoryQueueProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, MessagingError> {
        let batch = self.take_batch(max_messages);
        if !batch.is_empty() {
            return Ok(batch);
        }

        let _ = tokio::time::timeout(self.wait_time, self.arrivals.notified()).await;
        Ok(self.take_batch(max_messages))
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), MessagingError> {
        match self.in_flight.remove(&message.receipt_handle) {
            Some(_) => {
                self.deleted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            None => Err(MessagingError::message_not_found(
                &self.name,
                &message.message_id,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_receive_then_delete() {
        let queue = InMemoryQueueProvider::new("local");
        queue.push(QueueMessage::new("m-1", "{}"));
        queue.push(QueueMessage::new("m-2", "{}"));

        let batch = queue.receive(10).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(queue.in_flight_count(), 2);

        queue.delete(&batch[0]).await.unwrap();
        assert_eq!(queue.deleted_count(), 1);
        assert!(queue.delete(&batch[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_receive_waits_for_arrival() {
        let queue = std::sync::Arc::new(InMemoryQueueProvider::with_wait_time(
            "local",
            Duration::from_secs(5),
        ));
        let producer = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.push(QueueMessage::new("late", "{}"));
        });

        let batch = queue.receive(1).await.unwrap();
        assert_eq!(batch[0].message_id, "late");
    }

    #[tokio::test]
    async fn test_redeliver_in_flight() {
        let queue = InMemoryQueueProvider::with_wait_time("local", Duration::from_millis(1));
        queue.push(QueueMessage::new("m-1", "{}"));
        let _ = queue.receive(1).await.unwrap();

        assert_eq!(queue.redeliver_in_flight(), 1);
        assert_eq!(queue.pending_count(), 1);
        assert!(queue.receive(1).await.unwrap().len() == 1);
    }
}
