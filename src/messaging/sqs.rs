//! Amazon SQS queue provider.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::Client;
use std::collections::HashMap;
use tracing::{debug, info};

use super::{MessagingError, QueueMessage, QueueProvider};
use crate::config::QueueConfig;

#[derive(Debug, Clone)]
pub struct SqsQueueProvider {
    client: Client,
    queue_url: String,
    region: String,
    wait_time_seconds: i32,
    visibility_timeout_seconds: i32,
}

impl SqsQueueProvider {
    /// Build a client from the default AWS credential chain for the configured region
    pub async fn connect(config: &QueueConfig) -> Result<Self, MessagingError> {
        if config.queue_url.is_empty() {
            return Err(MessagingError::configuration(
                "sqs",
                "queue.queueUrl is not configured",
            ));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if !config.region.is_empty() {
            loader = loader.region(Region::new(config.region.clone()));
        }
        let sdk_config = loader.load().await;
        let region = sdk_config
            .region()
            .map(|r| r.to_string())
            .unwrap_or_else(|| config.region.clone());

        info!(
            queue_url = %config.queue_url,
            region = %region,
            "SQS queue provider connected"
        );

        Ok(Self::with_client(Client::new(&sdk_config), config, region))
    }

    pub fn with_client(client: Client, config: &QueueConfig, region: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: config.queue_url.clone(),
            region: region.into(),
            wait_time_seconds: config.wait_time_seconds.clamp(0, 20),
            visibility_timeout_seconds: config.visibility_timeout_seconds.max(0),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl QueueProvider for SqsQueueProvider {
    fn name(&self) -> &str {
        &self.region
    }

    async fn receive(&self, max_messages: usize) -> Result<Vec<QueueMessage>, MessagingError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(max_messages.clamp(1, 10) as i32)
            .wait_time_seconds(self.wait_time_seconds)
            .visibility_timeout(self.visibility_timeout_seconds)
            .message_attribute_names("All")
            .send()
            .await
            .map_err(|e| {
                MessagingError::queue_operation(
                    &self.region,
                    "receive",
                    DisplayErrorContext(&e).to_string(),
                )
            })?;

        let messages: Vec<QueueMessage> = output
            .messages()
            .iter()
            .map(|message| {
                let attributes: HashMap<String, String> = message
                    .message_attributes()
                    .map(|attributes| {
                        attributes
                            .iter()
                            .filter_map(|(name, value)| {
                                value
                                    .string_value()
                                    .map(|v| (name.clone(), v.to_string()))
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                QueueMessage {
                    message_id: message.message_id().unwrap_or_default().to_string(),
                    body: message.body().unwrap_or_default().to_string(),
                    receipt_handle: message.receipt_handle().unwrap_or_default().to_string(),
                    attributes,
                }
            })
            .collect();

        if !messages.is_empty() {
            debug!(count = messages.len(), "Received messages from SQS");
        }
        Ok(messages)
    }

    async fn delete(&self, message: &QueueMessage) -> Result<(), MessagingError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(&message.receipt_handle)
            .send()
            .await
            .map_err(|e| {
                MessagingError::queue_operation(
                    &self.region,
                    "delete",
                    DisplayErrorContext(&e).to_string(),
                )
            })?;
        Ok(())
    }
}
