//! Worker Supervision
//!
//! State of the ingestion workers and the policy deciding how long to wait
//! before relaunching a cohort after one of its workers terminated.
//!
//! The default policy restarts immediately. A non-zero initial delay turns
//! it into exponential backoff with jitter, reset once a cohort has stayed
//! up for `stable_after`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use serde::Serialize;

use super::quote::Exchange;

// =============================================================================
// Restart Policy
// =============================================================================

/// Configuration for cohort restart backoff.
#[derive(Debug, Clone)]
pub struct RestartConfig {
    /// Delay before the first restart (zero = immediate).
    pub initial_delay: Duration,
    /// Maximum delay between restarts.
    pub max_delay: Duration,
    /// Multiplier applied after each consecutive restart.
    pub multiplier: f64,
    /// Jitter factor as a fraction (e.g., 0.1 = ±10% randomization).
    pub jitter_factor: f64,
    /// A cohort that ran at least this long resets the backoff.
    pub stable_after: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter_factor: 0.0,
            stable_after: Duration::from_secs(60),
        }
    }
}

impl RestartConfig {
    /// Restart immediately, every time.
    #[must_use]
    pub fn immediate() -> Self {
        Self::default()
    }
}

/// Backoff state for consecutive cohort restarts.
///
/// Restarts are never exhausted: a worker failure must not stop ingestion.
#[derive(Debug)]
pub struct RestartPolicy {
    config: RestartConfig,
    current_delay: Duration,
    consecutive_restarts: u32,
}

impl RestartPolicy {
    /// Create a new restart policy.
    #[must_use]
    pub const fn new(config: RestartConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            consecutive_restarts: 0,
        }
    }

    /// Delay before the next restart, advancing the backoff.
    ///
    /// `uptime` is how long the cohort that just ended had been running.
    #[must_use]
    pub fn next_delay(&mut self, uptime: Duration) -> Duration {
        if uptime >= self.config.stable_after {
            self.reset();
        }

        self.consecutive_restarts = self.consecutive_restarts.saturating_add(1);
        let delay = self.apply_jitter(self.current_delay);

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        delay
    }

    /// Forget previous restarts.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.consecutive_restarts = 0;
    }

    /// Restarts since the last reset.
    #[must_use]
    pub const fn consecutive_restarts(&self) -> u32 {
        self.consecutive_restarts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 || duration.is_zero() {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted_u64 = adjusted_millis as u64;
        Duration::from_millis(adjusted_u64)
    }
}

// =============================================================================
// Worker State
// =============================================================================

/// Lifecycle status of one ingestion worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    /// Pulling from its source.
    Running,
    /// Terminated and caused the current cohort restart.
    Crashed,
    /// Torn down because a sibling terminated; waiting to be relaunched.
    Restarting,
}

impl WorkerStatus {
    /// Status name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Crashed => "crashed",
            Self::Restarting => "restarting",
        }
    }
}

/// State of one worker, one per exchange source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerState {
    /// Exchange the worker ingests.
    pub exchange: Exchange,
    /// Current status.
    pub status: WorkerStatus,
    /// Cohort restarts this worker went through.
    pub restart_count: u64,
}

/// Shared, read-mostly view of every worker's state.
///
/// Only the supervisor writes; health endpoints and tests read snapshots.
#[derive(Debug, Clone, Default)]
pub struct WorkerStates {
    inner: Arc<RwLock<Vec<WorkerState>>>,
}

impl WorkerStates {
    /// One running worker per exchange, no restarts yet.
    #[must_use]
    pub fn new(exchanges: impl IntoIterator<Item = Exchange>) -> Self {
        let states = exchanges
            .into_iter()
            .map(|exchange| WorkerState {
                exchange,
                status: WorkerStatus::Running,
                restart_count: 0,
            })
            .collect();
        Self {
            inner: Arc::new(RwLock::new(states)),
        }
    }

    /// Copy of every worker's state, in source order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<WorkerState> {
        self.inner.read().clone()
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no worker is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Whether every worker is running.
    #[must_use]
    pub fn all_running(&self) -> bool {
        self.inner
            .read()
            .iter()
            .all(|state| state.status == WorkerStatus::Running)
    }

    /// Mark every worker as running (a new cohort was launched).
    pub fn mark_all_running(&self) {
        for state in self.inner.write().iter_mut() {
            state.status = WorkerStatus::Running;
        }
    }

    /// Record a cohort restart caused by `crashed` (if known).
    ///
    /// Every worker's restart count goes up by exactly one.
    pub fn record_cohort_restart(&self, crashed: Option<usize>) {
        for (index, state) in self.inner.write().iter_mut().enumerate() {
            state.restart_count += 1;
            state.status = if Some(index) == crashed {
                WorkerStatus::Crashed
            } else {
                WorkerStatus::Restarting
            };
        }
    }
}
