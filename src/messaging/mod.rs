//! # Inbound Messaging
//!
//! Queue abstraction the agent receives action requests from. A [`QueueProvider`]
//! receives batches of [`QueueMessage`]s and deletes them once a job has taken
//! ownership; the [`QueueProcessor`] turns received messages into pool jobs.

pub mod errors;
pub mod memory;
pub mod processor;
#[cfg(feature = "sqs")]
pub mod sqs;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub use errors::MessagingError;
pub use memory::InMemoryQueueProvider;
pub use processor::{ProcessorConfig, QueueProcessor};
#[cfg(feature = "sqs")]
pub use sqs::SqsQueueProvider;

/// One message received from the inbound queue
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    /// Provider handle used to delete this delivery of the message
    pub receipt_handle: String,
    /// String-valued message attributes
    pub attributes: HashMap<String, String>,
}

impl QueueMessage {
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        let message_id = message_id.into();
        Self {
            receipt_handle: message_id.clone(),
            message_id,
            body: body.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }
}

#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Identifies the queue in logs and errors
    fn name(&self) -> &str;

    /// Receive up to `max_messages` messages; may return an empty batch
    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, MessagingError>;

    /// Permanently remove a received message from the queue
    async fn delete(&self, message: &QueueMessage) -> Result<(), MessagingError>;
}
