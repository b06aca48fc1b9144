//! Ingestion Supervisor
//!
//! Runs one worker per exchange source. Each worker loops
//! `pull -> normalize -> append`, awaiting its append before pulling the
//! next message. When any worker terminates, for whatever reason, the whole
//! cohort is torn down and relaunched with freshly opened sources.
//!
//! # Cohort Lifecycle
//!
//! ```text
//!          ┌──────────────┐   any worker ends   ┌─────────────┐
//!   ──────►│   running    │────────────────────►│ restarting  │
//!          └──────────────┘                     └──────┬──────┘
//!                 ▲            backoff delay           │
//!                 └────────────────────────────────────┘
//! ```
//!
//! Cancellation lets every worker finish its in-flight append before the
//! supervisor returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{QuoteNormalizer, QuoteSink, SourceError, SourceFactory};
use crate::domain::quote::Exchange;
use crate::domain::supervision::{RestartConfig, RestartPolicy, WorkerStates};
use crate::infrastructure::metrics::{self, DropReason};

/// Default time a worker may wait for one message before it is failed.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(320);

/// Supervisor configuration.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Maximum wait for a single message from a source.
    pub idle_timeout: Duration,
    /// Backoff between cohort restarts.
    pub restart: RestartConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            restart: RestartConfig::immediate(),
        }
    }
}

/// How a worker task ended.
#[derive(Debug)]
struct WorkerExit {
    index: usize,
    exchange: Exchange,
    result: Result<(), SourceError>,
}

/// Everything a worker needs, cloned into its task.
#[derive(Clone)]
struct WorkerContext {
    index: usize,
    factory: Arc<dyn SourceFactory>,
    normalizer: Arc<dyn QuoteNormalizer>,
    sink: Arc<dyn QuoteSink>,
    idle_timeout: Duration,
    cancel: CancellationToken,
}

/// Keeps one ingestion worker per source alive.
pub struct IngestionSupervisor {
    factories: Vec<Arc<dyn SourceFactory>>,
    normalizer: Arc<dyn QuoteNormalizer>,
    sink: Arc<dyn QuoteSink>,
    config: SupervisorConfig,
    states: WorkerStates,
}

impl IngestionSupervisor {
    /// Create a supervisor over `factories`, writing into `sink`.
    #[must_use]
    pub fn new(
        factories: Vec<Arc<dyn SourceFactory>>,
        normalizer: Arc<dyn QuoteNormalizer>,
        sink: Arc<dyn QuoteSink>,
        config: SupervisorConfig,
    ) -> Self {
        let states = WorkerStates::new(factories.iter().map(|f| f.exchange()));
        Self {
            factories,
            normalizer,
            sink,
            config,
            states,
        }
    }

    /// Report into an existing state registry instead of a fresh one.
    ///
    /// Restart counts then survive re-creating the supervisor, e.g. after
    /// the storage pool was re-acquired.
    #[must_use]
    pub fn with_states(mut self, states: WorkerStates) -> Self {
        if states.len() == self.factories.len() {
            self.states = states;
        } else {
            tracing::warn!(
                expected = self.factories.len(),
                provided = states.len(),
                "Worker state registry size mismatch, keeping a fresh registry"
            );
        }
        self
    }

    /// Shared handle on worker states.
    #[must_use]
    pub fn states(&self) -> WorkerStates {
        self.states.clone()
    }

    /// Supervise until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        if self.factories.is_empty() {
            tracing::warn!("No exchange sources configured, ingestion idle");
            cancel.cancelled().await;
            return;
        }

        let mut policy = RestartPolicy::new(self.config.restart.clone());

        loop {
            let launched_at = Instant::now();
            let mut cohort = self.launch_cohort(&cancel);

            let joined = tokio::select! {
                () = cancel.cancelled() => None,
                joined = cohort.join_next() => joined,
            };

            if cancel.is_cancelled() {
                drain(&mut cohort).await;
                tracing::info!("Ingestion supervisor stopped");
                return;
            }

            let crashed = match joined {
                Some(Ok(exit)) => {
                    match &exit.result {
                        Ok(()) => tracing::warn!(
                            exchange = %exit.exchange,
                            "Ingestion worker ended, restarting cohort"
                        ),
                        Err(e) => tracing::error!(
                            exchange = %exit.exchange,
                            error = %e,
                            "Ingestion worker failed, restarting cohort"
                        ),
                    }
                    Some(exit.index)
                }
                Some(Err(e)) => {
                    tracing::error!(error = %e, "Ingestion worker panicked, restarting cohort");
                    None
                }
                None => None,
            };

            cohort.abort_all();
            drain(&mut cohort).await;

            self.states.record_cohort_restart(crashed);
            metrics::record_cohort_restart();

            let delay = policy.next_delay(launched_at.elapsed());
            tracing::info!(
                delay_ms = delay.as_millis(),
                consecutive = policy.consecutive_restarts(),
                "Relaunching ingestion cohort"
            );
            if !delay.is_zero() {
                tokio::select! {
                    () = cancel.cancelled() => {
                        tracing::info!("Ingestion supervisor stopped during backoff");
                        return;
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    fn launch_cohort(&self, cancel: &CancellationToken) -> JoinSet<WorkerExit> {
        let mut cohort = JoinSet::new();
        for (index, factory) in self.factories.iter().enumerate() {
            let ctx = WorkerContext {
                index,
                factory: Arc::clone(factory),
                normalizer: Arc::clone(&self.normalizer),
                sink: Arc::clone(&self.sink),
                idle_timeout: self.config.idle_timeout,
                cancel: cancel.clone(),
            };
            cohort.spawn(run_worker(ctx));
        }
        self.states.mark_all_running();
        tracing::info!(workers = self.factories.len(), "Ingestion cohort launched");
        cohort
    }
}

async fn drain(cohort: &mut JoinSet<WorkerExit>) {
    while cohort.join_next().await.is_some() {}
}

async fn run_worker(ctx: WorkerContext) -> WorkerExit {
    let exchange = ctx.factory.exchange();
    let result = ingest(&ctx, exchange).await;
    WorkerExit {
        index: ctx.index,
        exchange,
        result,
    }
}

async fn ingest(ctx: &WorkerContext, exchange: Exchange) -> Result<(), SourceError> {
    let mut source = tokio::select! {
        () = ctx.cancel.cancelled() => return Ok(()),
        opened = ctx.factory.open() => opened?,
    };
    tracing::debug!(%exchange, "Exchange source opened");

    loop {
        let raw = tokio::select! {
            () = ctx.cancel.cancelled() => return Ok(()),
            next = tokio::time::timeout(ctx.idle_timeout, source.next()) => match next {
                Ok(message) => message?,
                Err(_) => return Err(SourceError::IdleTimeout(ctx.idle_timeout)),
            },
        };

        match ctx.normalizer.normalize(&raw) {
            Ok(Some(quote)) => match ctx.sink.append(&quote).await {
                Ok(()) => metrics::record_quote_appended(exchange),
                Err(e) => {
                    tracing::warn!(%exchange, error = %e, "Dropping quote, append failed");
                    metrics::record_quote_dropped(exchange, DropReason::StorageFailed);
                }
            },
            Ok(None) => {
                tracing::trace!(%exchange, "Message carries no quote");
            }
            Err(e) => {
                tracing::warn!(%exchange, error = %e, "Dropping malformed message");
                metrics::record_quote_dropped(exchange, DropReason::Malformed);
            }
        }
    }
}
