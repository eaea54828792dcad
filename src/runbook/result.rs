//! Result payload reported back to the calling service after each handled message.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of one handled message. Built fresh per message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionResultPayload {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(default)]
    pub is_successful: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub failure_message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub callback_context: String,
    /// Structured output of Http actions, inlined into the payload
    #[serde(flatten, default, skip_serializing_if = "Option::is_none")]
    pub http_response: Option<HttpResponse>,
}

impl ActionResultPayload {
    pub fn fail(&mut self, message: impl Into<String>) {
        self.is_successful = false;
        self.failure_message = message.into();
    }
}

/// What an Http action writes to standard output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub status_code: i32,
}
