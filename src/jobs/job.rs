//! # Queue Job
//!
//! Wraps one received message. Admission is a single compare-and-swap on the job
//! state, so the state check never holds a lock across the queue round trip or the
//! action execution. State moves `Initial -> Executing -> Finished | Error` once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam::atomic::AtomicCell;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use super::handler::{HandlerError, MessageHandler};
use crate::constants::attributes;
use crate::messaging::{MessagingError, QueueMessage, QueueProvider};
use crate::runbook::ResultDelivery;
use crate::worker_pool::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    Initial,
    Executing,
    Finished,
    Error,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job[{job_id}] is already executing or finished.")]
    AlreadyExecuting { job_id: String },

    #[error("Message[{message_id}] could not be deleted from the queue[{queue}]: {source}")]
    Delete {
        message_id: String,
        queue: String,
        #[source]
        source: MessagingError,
    },

    #[error("Message[{message_id}] is invalid, will not be processed.")]
    InvalidMessage { message_id: String },

    #[error("Message[{message_id}] could not be processed: {source}")]
    Processing {
        message_id: String,
        #[source]
        source: HandlerError,
    },
}

pub struct QueueJob {
    message: QueueMessage,
    owner_id: String,
    provider: Arc<dyn QueueProvider>,
    handler: Arc<dyn MessageHandler>,
    delivery: Arc<ResultDelivery>,
    state: AtomicCell<JobState>,
    created_at: DateTime<Utc>,
}

impl QueueJob {
    pub fn new(
        message: QueueMessage,
        owner_id: impl Into<String>,
        provider: Arc<dyn QueueProvider>,
        handler: Arc<dyn MessageHandler>,
        delivery: Arc<ResultDelivery>,
    ) -> Self {
        Self {
            message,
            owner_id: owner_id.into(),
            provider,
            handler,
            delivery,
            state: AtomicCell::new(JobState::Initial),
            created_at: Utc::now(),
        }
    }

    pub fn state(&self) -> JobState {
        self.state.load()
    }

    pub fn message(&self) -> &QueueMessage {
        &self.message
    }

    /// Milliseconds since the job was created from its message
    pub fn age_ms(&self) -> i64 {
        (Utc::now() - self.created_at).num_milliseconds()
    }

    /// Run the job. Every call after the first fails without side effects.
    #[instrument(skip(self), fields(message_id = %self.message.message_id))]
    pub async fn run(&self) -> Result<(), JobError> {
        let message_id = self.message.message_id.as_str();

        if self
            .state
            .compare_exchange(JobState::Initial, JobState::Executing)
            .is_err()
        {
            warn!("⚠️ JOB: Job[{}] is already executing or finished", message_id);
            return Err(JobError::AlreadyExecuting {
                job_id: message_id.to_string(),
            });
        }

        if let Err(e) = self.provider.delete(&self.message).await {
            self.state.store(JobState::Error);
            error!(
                queue = self.provider.name(),
                "❌ JOB: Message[{}] could not be deleted: {}", message_id, e
            );
            return Err(JobError::Delete {
                message_id: message_id.to_string(),
                queue: self.provider.name().to_string(),
                source: e,
            });
        }
        debug!("JOB: Message[{}] deleted from queue", message_id);

        if !self.is_owned() {
            self.state.store(JobState::Error);
            warn!(
                owner_id = %self.owner_id,
                "⚠️ JOB: Message[{}] does not belong to this agent", message_id
            );
            return Err(JobError::InvalidMessage {
                message_id: message_id.to_string(),
            });
        }

        match self.handler.handle(&self.message).await {
            Ok(result) => {
                self.delivery.enqueue(message_id, result);
                self.state.store(JobState::Finished);
                info!(
                    elapsed_ms = self.age_ms(),
                    "JOB: Message[{}] processed", message_id
                );
                Ok(())
            }
            Err(e) => {
                if let Some(result) = e.result() {
                    self.delivery.enqueue(message_id, result.clone());
                }
                self.state.store(JobState::Error);
                error!("❌ JOB: Message[{}] could not be processed: {}", message_id, e);
                Err(JobError::Processing {
                    message_id: message_id.to_string(),
                    source: e,
                })
            }
        }
    }

    fn is_owned(&self) -> bool {
        [attributes::OWNER_ID, attributes::CHANNEL_ID]
            .into_iter()
            .filter_map(|name| self.message.attribute(name))
            .any(|value| value == self.owner_id)
    }
}

#[async_trait]
impl Job for QueueJob {
    fn id(&self) -> &str {
        &self.message.message_id
    }

    async fn execute(&self) -> crate::error::Result<()> {
        Ok(self.run().await?)
    }
}

impl std::fmt::Debug for QueueJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueJob")
            .field("message_id", &self.message.message_id)
            .field("queue", &self.provider.name())
            .field("state", &self.state())
            .finish()
    }
}
