//! # Auto-Scaling Engine
//!
//! Decides, once per monitoring period, whether the pool should gain or lose a
//! worker. Growth is driven by sustained queue back-pressure, shrinking by a
//! sustained idle streak at least as long as the keep-alive time.

use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::constants::pool_defaults;

use super::config::PoolSettings;
use super::monitor::PoolMetrics;

/// Scaling action recommendations
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingAction {
    /// Add the specified number of workers
    ScaleUp { count: usize },
    /// Retire the specified number of workers
    ScaleDown { count: usize },
    /// No scaling action needed
    NoChange,
}

/// Stateful scaling policy, owned by the pool monitor
#[derive(Debug)]
pub struct ScalingEngine {
    keep_alive: Duration,
    /// Queue fill ratio (0.0-1.0) that counts as back-pressure
    pressure_ratio: f64,
    /// Consecutive pressured evaluations required before growing
    pressure_cycles: u32,
    pressured_streak: u32,
    idle_since: Option<Instant>,
}

impl ScalingEngine {
    pub fn new(settings: &PoolSettings) -> Self {
        Self::with_thresholds(
            settings,
            pool_defaults::PRESSURE_RATIO,
            pool_defaults::PRESSURE_CYCLES,
        )
    }

    pub fn with_thresholds(settings: &PoolSettings, pressure_ratio: f64, pressure_cycles: u32) -> Self {
        debug!(
            "🎛️ SCALING: Creating scaling engine (pressure: {:.0}% for {} cycles, keep-alive: {:?})",
            pressure_ratio * 100.0,
            pressure_cycles,
            settings.keep_alive
        );

        Self {
            keep_alive: settings.keep_alive,
            pressure_ratio,
            pressure_cycles: pressure_cycles.max(1),
            pressured_streak: 0,
            idle_since: None,
        }
    }

    /// Evaluate the next scaling action from a metrics snapshot taken at `now`
    pub fn evaluate(&mut self, metrics: &PoolMetrics, now: Instant) -> ScalingAction {
        let pressured = metrics.queued_jobs > 0 && metrics.queue_fill() >= self.pressure_ratio;

        if pressured {
            self.idle_since = None;
            self.pressured_streak = self.pressured_streak.saturating_add(1);

            if self.pressured_streak >= self.pressure_cycles
                && metrics.current_workers < metrics.max_workers
            {
                info!(
                    "SCALING: Queue at {:.0}% for {} cycles with {} workers (max: {}), scaling up by 1",
                    metrics.queue_fill() * 100.0,
                    self.pressured_streak,
                    metrics.current_workers,
                    metrics.max_workers
                );
                self.pressured_streak = 0;
                return ScalingAction::ScaleUp { count: 1 };
            }

            return ScalingAction::NoChange;
        }

        self.pressured_streak = 0;

        let idle = metrics.queued_jobs == 0 && metrics.active_jobs < metrics.current_workers;
        if !idle {
            self.idle_since = None;
            return ScalingAction::NoChange;
        }

        let since = *self.idle_since.get_or_insert(now);
        if now.duration_since(since) >= self.keep_alive
            && metrics.current_workers > metrics.min_workers
        {
            info!(
                "SCALING: Idle for {:?} with {} workers (min: {}), scaling down by 1",
                now.duration_since(since),
                metrics.current_workers,
                metrics.min_workers
            );
            // the next retirement needs a fresh idle streak
            self.idle_since = Some(now);
            return ScalingAction::ScaleDown { count: 1 };
        }

        ScalingAction::NoChange
    }
}
