//! Spread Sentinel Binary
//!
//! Starts ingestion, spread monitoring and the health endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin spread-sentinel
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `DATABASE_URL`: `PostgreSQL` DSN
//! - `SMTP_HOST`, `SMTP_USERNAME`, `SMTP_PASSWORD`, `SMTP_FROM`: report relay
//! - `ALERT_RECIPIENTS`: comma separated report recipients
//!
//! ## Optional
//! - `SENTINEL_EXCHANGES`: exchanges to ingest (default: kraken,bitstamp,coinbase)
//! - `SENTINEL_OPEN_FOR_SECS`: seconds a spread must stay open (default: 10)
//! - `SENTINEL_DONT_EMAIL_NEWER_THAN_SECS`: per-spread cooldown (default: 7200)
//! - `SENTINEL_POOL_RETRY_ATTEMPTS`: pool acquisition attempts (default: 20)
//! - `SENTINEL_HEALTH_PORT`: Health check HTTP port (default: 8090)
//! - `SENTINEL_LOG_FORMAT`: `text` or `json` (default: text)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use spread_sentinel::application::ports::{QuoteNormalizer, QuoteSink, SourceFactory};
use spread_sentinel::application::services::redact_dsn;
use spread_sentinel::infrastructure::alerting::SmtpDispatcher;
use spread_sentinel::infrastructure::exchanges::{ExchangeNormalizer, build_source_factories};
use spread_sentinel::infrastructure::health::{HealthServer, HealthServerState};
use spread_sentinel::infrastructure::storage::{PgConnector, PgStorage};
use spread_sentinel::infrastructure::telemetry;
use spread_sentinel::{
    IngestionSupervisor, MonitorConfig, PoolAcquirer, SentinelConfig, SpreadMonitor,
    SpreadTracker, SupervisorConfig, WorkerStates, init_metrics, validate_startup,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Spread Sentinel");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder unavailable, metrics disabled");
    }

    let config = SentinelConfig::from_env().context("loading configuration")?;
    let validation = validate_startup(&config).context("validating configuration")?;
    for warning in &validation.warnings {
        tracing::warn!(warning = %warning, "Configuration warning");
    }
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let factories =
        build_source_factories(&config.ingestion).context("building exchange sources")?;
    let normalizer: Arc<dyn QuoteNormalizer> = Arc::new(ExchangeNormalizer);
    let worker_states = WorkerStates::new(factories.iter().map(|f| f.exchange()));
    let supervisor_config = SupervisorConfig {
        idle_timeout: config.ingestion.idle_timeout,
        restart: config.ingestion.restart.clone(),
    };

    let dispatcher =
        Arc::new(SmtpDispatcher::from_settings(&config.smtp).context("building SMTP dispatcher")?);
    let mut monitor = SpreadMonitor::new(
        dispatcher,
        SpreadTracker::new(validation.window),
        MonitorConfig {
            poll_interval: config.alerting.poll_interval,
            query: config.alerting.query.clone(),
        },
    );

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        worker_states.clone(),
        monitor.last_cycle(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        Arc::clone(&health_state),
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let acquirer = PoolAcquirer::new(
        PgConnector::new(
            config.database.min_connections,
            config.database.max_connections,
            config.database.acquire_timeout,
        ),
        config.database.retry,
    );

    // Each pass holds one pool. A pass ends on shutdown, or when the pool
    // is flagged unusable, in which case it is closed and re-acquired.
    loop {
        let pool = tokio::select! {
            () = shutdown_token.cancelled() => break,
            acquired = acquirer.acquire(&config.database.url) => {
                acquired.context("acquiring storage pool")?
            }
        };

        let storage = PgStorage::new(pool, config.database.failure_threshold);
        if let Err(e) = storage.migrate().await {
            storage.close().await;
            return Err(anyhow::Error::new(e).context("creating quotes table"));
        }
        match storage.knows_timezone(&config.alerting.query.timezone).await {
            Ok(true) => {}
            Ok(false) => {
                storage.close().await;
                anyhow::bail!(
                    "SENTINEL_ACTIVE_TIMEZONE: unknown time zone {:?}",
                    config.alerting.query.timezone
                );
            }
            Err(e) => {
                storage.close().await;
                return Err(anyhow::Error::new(e).context("looking up active time zone"));
            }
        }
        health_state.set_storage(Some(storage.health()));

        let run_token = shutdown_token.child_token();
        let sink: Arc<dyn QuoteSink> = Arc::new(storage.clone());
        let supervisor = IngestionSupervisor::new(
            factories.clone(),
            Arc::clone(&normalizer),
            sink,
            supervisor_config.clone(),
        )
        .with_states(worker_states.clone());

        let storage_health = storage.health();
        let watchdog = async {
            tokio::select! {
                () = storage_health.unusable() => {
                    tracing::warn!("Storage pool unusable, re-acquiring");
                    run_token.cancel();
                    true
                }
                () = run_token.cancelled() => false,
            }
        };

        tracing::info!("Spread Sentinel ready");

        let ((), (), reacquire) = tokio::join!(
            supervisor.run(run_token.clone()),
            monitor.run(&storage, run_token.clone()),
            watchdog,
        );

        health_state.set_storage(None);
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, storage.close())
            .await
            .is_err()
        {
            tracing::warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Timed out closing storage pool"
            );
        }

        if !reacquire || shutdown_token.is_cancelled() {
            break;
        }
    }

    tracing::info!("Spread Sentinel stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &SentinelConfig) {
    let exchanges: Vec<&str> = config
        .ingestion
        .exchanges
        .iter()
        .map(spread_sentinel::Exchange::as_str)
        .collect();
    tracing::info!(
        exchanges = ?exchanges,
        pair = %config.ingestion.pair,
        health_port = config.server.health_port,
        open_for_secs = config.alerting.open_for.as_secs(),
        cooldown_secs = config.alerting.dont_email_newer_than.as_secs(),
        reset = config.alerting.reset.as_str(),
        "Configuration loaded"
    );
    tracing::debug!(
        dsn = %redact_dsn(&config.database.url),
        retry_attempts = config.database.retry.attempts,
        retry_delay_secs = config.database.retry.delay.as_secs(),
        smtp_host = %config.smtp.host,
        recipients = config.smtp.recipients.len(),
        "Endpoints"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
