#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Runbook Agent
//!
//! Queue-driven remote execution agent. Messages received from an inbound queue are
//! mapped to locally registered or git-sourced actions, executed as child processes
//! under an elastic worker pool, and answered with a structured result posted back
//! to the calling service.
//!
//! ## Module Organization
//!
//! - [`worker_pool`] - Bounded, self-scaling pool of async workers
//! - [`jobs`] - Per-message admission control and action resolution
//! - [`runbook`] - Child process execution, callback pipes, output sinks, result delivery
//! - [`messaging`] - Inbound queue providers and the polling processor
//! - [`git`] - Shared/exclusive access to git clones actions run from
//! - [`config`] - Configuration loading and validation
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Control Flow
//!
//! ```text
//! QueueProvider -> QueueProcessor -> WorkerPool -> QueueJob
//!     -> ActionMessageHandler -> ProcessExecutor (+ CallbackChannel)
//!     -> ResultDelivery -> HttpResultSender
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runbook_agent::config::ConfigManager;
//! use runbook_agent::jobs::ActionMessageHandler;
//! use runbook_agent::runbook::{ActionSinks, ProcessExecutor};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config();
//! let specs = config.action_specifications();
//! let sinks = ActionSinks::from_mappings(specs.action_mappings.values());
//! let executor = Arc::new(ProcessExecutor::with_timeout(config.execution_timeout()));
//! let _handler = ActionMessageHandler::new(None, specs, sinks, executor);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod git;
pub mod jobs;
pub mod logging;
pub mod messaging;
pub mod runbook;
pub mod worker_pool;

pub use config::{AgentConfig, ConfigManager};
pub use error::{AgentError, Result};
pub use jobs::{ActionMessageHandler, QueueJob};
pub use messaging::{QueueMessage, QueueProcessor, QueueProvider};
pub use runbook::{ActionResultPayload, ProcessExecutor, ResultDelivery};
pub use worker_pool::{PoolConfiguration, WorkerPool};
