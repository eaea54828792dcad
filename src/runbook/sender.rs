//! # Result Sender
//!
//! Posts action results back to the calling service.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::result::ActionResultPayload;
use crate::constants;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Cannot marshal payload: {0}")]
    Serialization(String),

    #[error("Invalid delivery configuration: {0}")]
    Configuration(String),

    #[error("Result request failed: {0}")]
    Transport(String),

    #[error("Unexpected response status: {status}, error message: {body}")]
    UnexpectedStatus { status: u16, body: String },
}

impl DeliveryError {
    /// Whether another attempt could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::UnexpectedStatus { status, .. } => *status == 429 || *status >= 500,
            Self::Serialization(_) | Self::Configuration(_) => false,
        }
    }
}

#[async_trait]
pub trait ResultSender: Send + Sync {
    async fn send(&self, payload: &ActionResultPayload) -> Result<(), DeliveryError>;
}

/// Delivers results over HTTP with the agent's API key
#[derive(Debug, Clone)]
pub struct HttpResultSender {
    client: Client,
    result_url: String,
}

impl HttpResultSender {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let mut headers = HeaderMap::new();
        let authorization = HeaderValue::from_str(&format!(
            "{} {}",
            constants::AUTHORIZATION_SCHEME,
            api_key
        ))
        .map_err(|e| DeliveryError::Configuration(format!("Invalid API key: {e}")))?;
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(constants::RESULT_CONTENT_TYPE),
        );

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("runbook-agent/{}", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()
            .map_err(|e| {
                DeliveryError::Configuration(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            result_url: format!(
                "{}{}",
                base_url.trim_end_matches('/'),
                constants::RESULT_PATH
            ),
        })
    }

    pub fn result_url(&self) -> &str {
        &self.result_url
    }
}

#[async_trait]
impl ResultSender for HttpResultSender {
    async fn send(&self, payload: &ActionResultPayload) -> Result<(), DeliveryError> {
        let body =
            serde_json::to_vec(payload).map_err(|e| DeliveryError::Serialization(e.to_string()))?;

        debug!(url = %self.result_url, "DELIVERY: Posting action result");

        let response = self
            .client
            .post(&self.result_url)
            .body(body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("could not read response body: {e}"));
        Err(DeliveryError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }
}
