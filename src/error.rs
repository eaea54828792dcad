//! # Error Types
//!
//! Crate-wide error type for the runbook agent. Each area owns a focused error enum
//! (`ConfigurationError`, `WorkerPoolError`, `MessagingError`, `JobError`,
//! `HandlerError`, `ExecutionError`, `DeliveryError`); all of them convert into
//! [`AgentError`] so callers crossing module boundaries can use a single `Result`.

use thiserror::Error;

use crate::config::ConfigurationError;
use crate::jobs::{HandlerError, JobError};
use crate::messaging::MessagingError;
use crate::runbook::{DeliveryError, ExecutionError};
use crate::worker_pool::WorkerPoolError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Worker pool error: {0}")]
    WorkerPool(#[from] WorkerPoolError),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("{0}")]
    Job(#[from] JobError),
    #[error("{0}")]
    Handler(#[from] HandlerError),
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
