//! Shared mocks for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use runbook_agent::config::DeliveryConfig;
use runbook_agent::error::Result;
use runbook_agent::jobs::{HandlerError, MessageHandler, ResolutionError};
use runbook_agent::messaging::{MessagingError, QueueMessage, QueueProvider};
use runbook_agent::runbook::{ActionResultPayload, DeliveryError, ResultDelivery, ResultSender};
use runbook_agent::worker_pool::Job;

/// Records every execution by job id
#[derive(Debug, Default)]
pub struct ExecutionLog {
    executions: DashMap<String, usize>,
    total: AtomicUsize,
}

impl ExecutionLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, id: &str) {
        *self.executions.entry(id.to_string()).or_insert(0) += 1;
        self.total.fetch_add(1, Ordering::SeqCst);
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn distinct(&self) -> usize {
        self.executions.len()
    }

    pub fn max_per_job(&self) -> usize {
        self.executions
            .iter()
            .map(|entry| *entry.value())
            .max()
            .unwrap_or(0)
    }
}

pub struct MockJob {
    id: String,
    work: Duration,
    log: Arc<ExecutionLog>,
}

impl MockJob {
    pub fn new(id: impl Into<String>, log: Arc<ExecutionLog>) -> Arc<Self> {
        Self::slow(id, Duration::ZERO, log)
    }

    pub fn slow(id: impl Into<String>, work: Duration, log: Arc<ExecutionLog>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            work,
            log,
        })
    }
}

#[async_trait]
impl Job for MockJob {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(&self) -> Result<()> {
        if !self.work.is_zero() {
            tokio::time::sleep(self.work).await;
        }
        self.log.record(&self.id);
        Ok(())
    }
}

/// Handler returning a fixed result and counting calls
#[derive(Debug, Default)]
pub struct MockHandler {
    calls: AtomicUsize,
    delay: Duration,
    unmapped: bool,
}

impl MockHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    /// Fails every message as an unmapped action, carrying the failed result
    pub fn unmapped() -> Arc<Self> {
        Arc::new(Self {
            unmapped: true,
            ..Self::default()
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for MockHandler {
    async fn handle(
        &self,
        message: &QueueMessage,
    ) -> std::result::Result<ActionResultPayload, HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.unmapped {
            let reason = ResolutionError::NoMappedAction {
                action: "Create".to_string(),
            };
            let mut result = ActionResultPayload {
                request_id: message.message_id.clone(),
                action: "Create".to_string(),
                ..Default::default()
            };
            result.fail(reason.to_string());
            return Err(HandlerError::Unresolved {
                reason,
                result: Box::new(result),
            });
        }
        Ok(ActionResultPayload {
            request_id: message.message_id.clone(),
            is_successful: true,
            ..Default::default()
        })
    }
}

/// Sender keeping every payload it was asked to deliver
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<ActionResultPayload>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<ActionResultPayload> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl ResultSender for RecordingSender {
    async fn send(&self, payload: &ActionResultPayload) -> std::result::Result<(), DeliveryError> {
        self.sent.lock().push(payload.clone());
        Ok(())
    }
}

/// Provider whose deletes always fail
#[derive(Debug, Default)]
pub struct FailingDeleteProvider {
    delete_attempts: AtomicUsize,
}

impl FailingDeleteProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn delete_attempts(&self) -> usize {
        self.delete_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueProvider for FailingDeleteProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn receive(
        &self,
        _max_messages: usize,
    ) -> std::result::Result<Vec<QueueMessage>, MessagingError> {
        Ok(Vec::new())
    }

    async fn delete(&self, message: &QueueMessage) -> std::result::Result<(), MessagingError> {
        self.delete_attempts.fetch_add(1, Ordering::SeqCst);
        Err(MessagingError::queue_operation(
            "failing",
            "delete",
            format!("access denied for {}", message.receipt_handle),
        ))
    }
}

pub fn fast_delivery_config() -> DeliveryConfig {
    DeliveryConfig {
        queue_capacity: 2_048,
        max_concurrent: 4,
        max_attempts: 2,
        initial_backoff_millis: 5,
        max_backoff_millis: 20,
        request_timeout_millis: 2_000,
    }
}

pub fn delivery_to(sender: Arc<dyn ResultSender>) -> Arc<ResultDelivery> {
    Arc::new(ResultDelivery::start(sender, fast_delivery_config()))
}

/// Write an executable script into `dir`
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, content: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
