//! Spread Monitor
//!
//! The read side. On every tick it queries current spreads, feeds them to
//! the [`SpreadTracker`] and dispatches one batched report for the spreads
//! that became ready. A failed delivery is logged and the batch is still
//! marked as alerted; there is no retry.
//!
//! The monitor outlives any single storage pool: the repository is passed
//! per run so tracking and cooldown state survive a pool re-acquisition.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{AlertDispatcher, SpreadRepository, StorageError};
use crate::domain::spread::SpreadQuery;
use crate::domain::tracking::SpreadTracker;
use crate::infrastructure::metrics::{self, AlertOutcome};

/// Default time between cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between cycles.
    pub poll_interval: Duration,
    /// Storage-side spread filters.
    pub query: SpreadQuery,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            query: SpreadQuery::default(),
        }
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Evaluation time.
    pub at: DateTime<Utc>,
    /// Spreads returned by storage.
    pub fetched: usize,
    /// Spreads reported this cycle.
    pub alerted: usize,
    /// `Some(true)` if a report was delivered, `Some(false)` if delivery failed.
    pub delivered: Option<bool>,
    /// Tracked spreads after the cycle.
    pub tracked: usize,
    /// Keys in cooldown after the cycle.
    pub cooling_down: usize,
}

/// Shared handle on the last completed cycle.
#[derive(Debug, Clone, Default)]
pub struct LastCycle {
    inner: Arc<RwLock<Option<CycleReport>>>,
}

impl LastCycle {
    /// Most recent report, if any cycle completed.
    #[must_use]
    pub fn get(&self) -> Option<CycleReport> {
        self.inner.read().clone()
    }

    fn set(&self, report: CycleReport) {
        *self.inner.write() = Some(report);
    }
}

/// Periodic spread evaluation and alerting.
pub struct SpreadMonitor {
    dispatcher: Arc<dyn AlertDispatcher>,
    tracker: SpreadTracker,
    config: MonitorConfig,
    last_cycle: LastCycle,
}

impl SpreadMonitor {
    /// Create a monitor.
    #[must_use]
    pub fn new(
        dispatcher: Arc<dyn AlertDispatcher>,
        tracker: SpreadTracker,
        config: MonitorConfig,
    ) -> Self {
        Self {
            dispatcher,
            tracker,
            config,
            last_cycle: LastCycle::default(),
        }
    }

    /// Shared handle on the last cycle report.
    #[must_use]
    pub fn last_cycle(&self) -> LastCycle {
        self.last_cycle.clone()
    }

    /// Tracker state, for inspection.
    #[must_use]
    pub const fn tracker(&self) -> &SpreadTracker {
        &self.tracker
    }

    /// Run cycles until `cancel` fires. The current cycle always completes.
    pub async fn run(&mut self, repository: &dyn SpreadRepository, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis(),
            "Spread monitor started"
        );

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.run_cycle(repository, Utc::now()).await {
                tracing::warn!(error = %e, "Spread query failed, skipping cycle");
            }
        }

        tracing::info!("Spread monitor stopped");
    }

    /// One query / track / alert cycle evaluated at `now`.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the spread query failed; tracking state
    /// is left untouched in that case.
    pub async fn run_cycle(
        &mut self,
        repository: &dyn SpreadRepository,
        now: DateTime<Utc>,
    ) -> Result<CycleReport, StorageError> {
        let started = Instant::now();

        let spreads = repository.query_spreads(&self.config.query).await?;
        let fetched = spreads.len();
        self.tracker.merge(spreads);

        let batch = self.tracker.ready_to_send(now);
        let mut delivered = None;

        if !batch.is_empty() {
            tracing::info!(spreads = batch.len(), "Dispatching spread report");
            match self.dispatcher.send(&batch).await {
                Ok(()) => {
                    metrics::record_alert(AlertOutcome::Sent, batch.len());
                    delivered = Some(true);
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        spreads = batch.len(),
                        "Spread report delivery failed, batch dropped"
                    );
                    metrics::record_alert(AlertOutcome::Failed, batch.len());
                    delivered = Some(false);
                }
            }
            self.tracker.mark_alerted(&batch, now);
        }

        let report = CycleReport {
            at: now,
            fetched,
            alerted: batch.len(),
            delivered,
            tracked: self.tracker.tracked_len(),
            cooling_down: self.tracker.cooldown_len(),
        };

        metrics::set_tracking_sizes(report.tracked, report.cooling_down);
        metrics::record_cycle_duration(started.elapsed());
        tracing::debug!(
            fetched = report.fetched,
            tracked = report.tracked,
            cooling_down = report.cooling_down,
            "Spread cycle complete"
        );

        self.last_cycle.set(report.clone());
        Ok(report)
    }
}
