//! # Jobs
//!
//! Per-message admission and lifecycle ([`QueueJob`]) and the business logic a job
//! delegates to ([`ActionMessageHandler`]).

pub mod handler;
pub mod job;
pub mod payload;

pub use handler::{ActionMessageHandler, HandlerError, MessageHandler, ResolutionError};
pub use job::{JobError, JobState, QueueJob};
pub use payload::QueuePayload;
