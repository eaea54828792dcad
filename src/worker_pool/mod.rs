//! # Worker Pool
//!
//! Bounded, elastic pool of async workers consuming jobs from a bounded queue.
//!
//! The pool starts with `min_workers` workers. A single monitor task evaluates
//! the pool once per monitoring period and is the only component that adds or
//! retires workers afterwards, keeping the count within `[min_workers, max_workers]`.
//! Submission never blocks unless the caller asks for it with a timeout.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use runbook_agent::worker_pool::{Job, PoolConfiguration, WorkerPool};
//!
//! struct Ping;
//!
//! #[async_trait::async_trait]
//! impl Job for Ping {
//!     fn id(&self) -> &str {
//!         "ping"
//!     }
//!
//!     async fn execute(&self) -> runbook_agent::error::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = WorkerPool::new(PoolConfiguration::default());
//! pool.start().await?;
//! let accepted = pool.submit(Arc::new(Ping))?;
//! assert!(accepted);
//! pool.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod monitor;
pub mod pool;
pub mod scaling;

use async_trait::async_trait;
use thiserror::Error;

pub use config::{PoolConfiguration, PoolSettings};
pub use monitor::PoolMetrics;
pub use pool::{PoolState, WorkerPool};
pub use scaling::{ScalingAction, ScalingEngine};

/// A unit of work executed by exactly one pool worker
#[async_trait]
pub trait Job: Send + Sync {
    fn id(&self) -> &str;

    async fn execute(&self) -> crate::error::Result<()>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WorkerPoolError {
    #[error("worker pool is already running")]
    AlreadyRunning,
    #[error("worker pool is not running")]
    NotRunning,
    #[error("worker pool has already been stopped")]
    AlreadyStopped,
    #[error("worker pool queue is closed")]
    Closed,
}
