//! # Pool Configuration
//!
//! Raw pool settings as they appear in configuration, and the normalized
//! [`PoolSettings`] the pool actually runs with.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::constants::pool_defaults;

/// Pool sizing as configured. Missing or non-positive values fall back to defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConfiguration {
    pub max_workers: i64,
    pub min_workers: i64,
    pub queue_capacity: i64,
    pub keep_alive_millis: i64,
    pub monitoring_period_millis: i64,
}

/// Normalized, immutable pool settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_workers: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
    pub keep_alive: Duration,
    pub monitoring_period: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolConfiguration::default().normalize()
    }
}

impl PoolConfiguration {
    /// Replace invalid values with defaults and keep `max_workers >= min_workers`
    pub fn normalize(&self) -> PoolSettings {
        let min_workers = positive(self.min_workers).unwrap_or(pool_defaults::MIN_WORKERS as u64);
        let mut max_workers =
            positive(self.max_workers).unwrap_or(pool_defaults::MAX_WORKERS as u64);

        if max_workers < min_workers {
            warn!(
                "POOL: maxWorkers {} is below minWorkers {}, raising it to {}",
                max_workers, min_workers, min_workers
            );
            max_workers = min_workers;
        }

        PoolSettings {
            min_workers: min_workers as usize,
            max_workers: max_workers as usize,
            queue_capacity: positive(self.queue_capacity)
                .unwrap_or(pool_defaults::QUEUE_CAPACITY as u64) as usize,
            keep_alive: Duration::from_millis(
                positive(self.keep_alive_millis).unwrap_or(pool_defaults::KEEP_ALIVE_MILLIS),
            ),
            monitoring_period: Duration::from_millis(
                positive(self.monitoring_period_millis)
                    .unwrap_or(pool_defaults::MONITORING_PERIOD_MILLIS),
            ),
        }
    }
}

impl From<PoolConfiguration> for PoolSettings {
    fn from(config: PoolConfiguration) -> Self {
        config.normalize()
    }
}

fn positive(value: i64) -> Option<u64> {
    (value > 0).then_some(value as u64)
}
