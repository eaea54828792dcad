//! # Message Handler
//!
//! Resolves a queue message to a configured action, runs it through the
//! [`ActionExecutor`], and assembles the [`ActionResultPayload`] to report.
//!
//! Failures the caller should still report (an unknown action, a type mismatch, a
//! failed or unparseable execution) produce a result. Malformed messages,
//! unknown source types and repository failures produce no result.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::payload::QueuePayload;
use crate::config::{ActionMapping, ActionSpecifications, ActionType, SourceType};
use crate::constants::global_args;
use crate::git::{Repository, RepositoryError, RepositoryProvider};
use crate::messaging::QueueMessage;
use crate::runbook::{
    ActionExecutor, ActionResultPayload, ActionSinks, CaptureBuffer, ExecutionRequest,
    HttpResponse, OutputSink, TeeSink,
};

/// The requested action cannot be matched to a mapping
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("No mapped action is configured for requested action[{action}]. The request will be ignored.")]
    NoMappedAction { action: String },

    #[error("The type[{mapped}] of the mapped action[{action}] is not compatible with requested type[{requested}]. The request will be ignored.")]
    IncompatibleType {
        action: String,
        mapped: String,
        requested: String,
    },
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("Queue message body could not be parsed: {0}")]
    Payload(String),

    #[error("Queue message does not contain action property.")]
    MissingAction,

    /// Carries the unsuccessful result so it can still be reported
    #[error("{reason}")]
    Unresolved {
        reason: ResolutionError,
        result: Box<ActionResultPayload>,
    },

    #[error("Unknown action sourceType[{0}].")]
    UnknownSourceType(String),

    #[error("Repositories should be provided.")]
    RepositoriesUnavailable,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl HandlerError {
    /// Result to report despite the error, if any
    pub fn result(&self) -> Option<&ActionResultPayload> {
        match self {
            Self::Unresolved { result, .. } => Some(result),
            _ => None,
        }
    }
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &QueueMessage) -> Result<ActionResultPayload, HandlerError>;
}

/// Handles action requests using configured action mappings
pub struct ActionMessageHandler {
    repositories: Option<Arc<dyn RepositoryProvider>>,
    specs: ActionSpecifications,
    sinks: ActionSinks,
    executor: Arc<dyn ActionExecutor>,
}

impl ActionMessageHandler {
    pub fn new(
        repositories: Option<Arc<dyn RepositoryProvider>>,
        specs: ActionSpecifications,
        sinks: ActionSinks,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            repositories,
            specs,
            sinks,
            executor,
        }
    }

    fn resolve(&self, action: &str, requested: &str) -> Result<&ActionMapping, ResolutionError> {
        let mapping = self
            .specs
            .action_mappings
            .get(action)
            .ok_or_else(|| ResolutionError::NoMappedAction {
                action: action.to_string(),
            })?;

        if mapping.action_type.as_str() != requested {
            return Err(ResolutionError::IncompatibleType {
                action: action.to_string(),
                mapped: mapping.action_type.to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(mapping)
    }

    async fn repository_for(&self, mapping: &ActionMapping) -> Result<Arc<Repository>, HandlerError> {
        let repositories = self
            .repositories
            .as_ref()
            .ok_or(HandlerError::RepositoriesUnavailable)?;
        let url = mapping
            .git_options
            .as_ref()
            .map(|options| options.url.as_str())
            .unwrap_or_default();
        Ok(repositories.get(url).await?)
    }

    fn invocation_args(&self, mapping: &ActionMapping, body: &str) -> Vec<String> {
        let mut args = self.specs.global_flags.args();
        args.extend(mapping.flags.args());
        args.push(global_args::PAYLOAD.to_string());
        args.push(body.to_string());
        args.extend(self.specs.global_args.iter().cloned());
        args.extend(mapping.args.iter().cloned());
        args
    }

    fn stdout_sink(
        &self,
        mapping: &ActionMapping,
        capture: Option<&Arc<CaptureBuffer>>,
    ) -> Option<Arc<dyn OutputSink>> {
        let configured = self.sinks.get(mapping.stdout.as_deref());
        match (capture, configured) {
            (Some(capture), Some(configured)) => Some(Arc::new(TeeSink::new(vec![
                capture.clone() as Arc<dyn OutputSink>,
                configured,
            ]))),
            (Some(capture), None) => Some(capture.clone() as Arc<dyn OutputSink>),
            (None, configured) => configured,
        }
    }
}

#[async_trait]
impl MessageHandler for ActionMessageHandler {
    #[instrument(skip(self, message), fields(message_id = %message.message_id))]
    async fn handle(&self, message: &QueueMessage) -> Result<ActionResultPayload, HandlerError> {
        let payload: QueuePayload = serde_json::from_str(&message.body)
            .map_err(|e| HandlerError::Payload(e.to_string()))?;
        let action = payload
            .action_name()
            .ok_or(HandlerError::MissingAction)?
            .to_string();
        let requested_type = payload.requested_type();

        let mut result = ActionResultPayload {
            entity_id: payload.entity.id.clone(),
            entity_type: payload.entity.entity_type.clone(),
            action: action.clone(),
            action_type: requested_type.to_string(),
            request_id: payload.request_id.clone(),
            ..Default::default()
        };

        let mapping = match self.resolve(&action, requested_type) {
            Ok(mapping) => mapping,
            Err(reason) => {
                result.fail(reason.to_string());
                return Err(HandlerError::Unresolved {
                    reason,
                    result: Box::new(result),
                });
            }
        };

        let repository = match mapping.source_type {
            SourceType::Git => Some(self.repository_for(mapping).await?),
            SourceType::Local => None,
            SourceType::Unknown => {
                return Err(HandlerError::UnknownSourceType(
                    mapping.source_type.to_string(),
                ))
            }
        };
        // held until the action exits
        let _repository_guard = match &repository {
            Some(repository) => Some(repository.read().await),
            None => None,
        };
        let executable = match &repository {
            Some(repository) => repository.path().join(&mapping.filepath),
            None => PathBuf::from(&mapping.filepath),
        };

        let is_http = mapping.action_type == ActionType::Http;
        let capture = is_http.then(|| Arc::new(CaptureBuffer::new()));

        let mut env = self.specs.global_env.clone();
        env.extend(mapping.env.iter().cloned());

        let request = ExecutionRequest {
            execution_id: Uuid::new_v4().simple().to_string(),
            executable,
            args: self.invocation_args(mapping, &message.body),
            env,
            stdout: self.stdout_sink(mapping, capture.as_ref()),
            stderr: self.sinks.get(mapping.stderr.as_deref()),
        };
        debug!(
            action = %action,
            execution_id = %request.execution_id,
            "HANDLER: Executing action of message[{}]", message.message_id
        );

        let start = Instant::now();
        let outcome = self.executor.execute(request).await;
        let took = start.elapsed();

        match outcome {
            Ok(callback_context) => {
                result.callback_context = callback_context;
                result.is_successful = true;

                if is_http && !payload.discard_script_response {
                    let raw = capture.map(|c| c.text()).unwrap_or_default();
                    match serde_json::from_str::<HttpResponse>(&raw) {
                        Ok(http_response) => result.http_response = Some(http_response),
                        Err(e) => {
                            debug!(
                                "HANDLER: Http action[{}] of message[{}] failed, could not parse http response fields: {}, error: {}",
                                action, message.message_id, raw, e
                            );
                            result.fail(format!("Could not parse http response fields: {raw}"));
                        }
                    }
                }

                debug!(
                    "HANDLER: Action[{}] execution of message[{}] has been completed and it took {:.3} seconds.",
                    action,
                    message.message_id,
                    took.as_secs_f64()
                );
            }
            Err(e) => {
                result.fail(format!("Err: {}, Stderr: {}", e.message, e.stderr));
                debug!(
                    "HANDLER: Action[{}] execution of message[{}] failed: {} Stderr: {}",
                    action, message.message_id, e.message, e.stderr
                );
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Flags;
    use std::collections::{BTreeMap, HashMap};

    fn mapping(action_type: ActionType) -> ActionMapping {
        ActionMapping {
            action_type,
            source_type: SourceType::Local,
            filepath: "/path/to/action.sh".to_string(),
            flags: Flags(BTreeMap::from([("f".to_string(), "1".to_string())])),
            args: vec!["action-arg".to_string()],
            env: vec![],
            stdout: None,
            stderr: None,
            git_options: None,
        }
    }

    struct NeverExecutor;

    #[async_trait]
    impl ActionExecutor for NeverExecutor {
        async fn execute(
            &self,
            _request: ExecutionRequest,
        ) -> Result<String, crate::runbook::ExecutionError> {
            unreachable!("not executed in these tests")
        }
    }

    fn handler() -> ActionMessageHandler {
        ActionMessageHandler::new(
            None,
            ActionSpecifications {
                action_mappings: HashMap::from([
                    ("Create".to_string(), mapping(ActionType::Custom)),
                    ("Retrieve".to_string(), mapping(ActionType::Http)),
                ]),
                global_flags: Flags(BTreeMap::from([("g".to_string(), "2".to_string())])),
                global_args: vec!["global-arg".to_string()],
                global_env: vec![],
            },
            ActionSinks::new(),
            Arc::new(NeverExecutor),
        )
    }

    #[test]
    fn test_resolve_type_mismatch() {
        let handler = handler();
        assert!(handler.resolve("Create", "custom").is_ok());
        assert_eq!(
            handler.resolve("Retrieve", "custom").unwrap_err(),
            ResolutionError::IncompatibleType {
                action: "Retrieve".to_string(),
                mapped: "http".to_string(),
                requested: "custom".to_string(),
            }
        );
    }

    #[test]
    fn test_invocation_args_order() {
        let handler = handler();
        let args = handler.invocation_args(&mapping(ActionType::Custom), "{body}");
        assert_eq!(
            args,
            vec!["-g", "2", "-f", "1", "-payload", "{body}", "global-arg", "action-arg"]
        );
    }

    #[tokio::test]
    async fn test_missing_action_is_a_hard_error() {
        let handler = handler();
        let error = handler
            .handle(&QueueMessage::new("m-1", r#"{"requestId":"r"}"#))
            .await
            .unwrap_err();
        assert!(matches!(error, HandlerError::MissingAction));
        assert!(error.result().is_none());
        assert_eq!(
            error.to_string(),
            "Queue message does not contain action property."
        );
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_hard_error() {
        let error = handler()
            .handle(&QueueMessage::new("m-1", "not json"))
            .await
            .unwrap_err();
        assert!(matches!(error, HandlerError::Payload(_)));
    }
}
