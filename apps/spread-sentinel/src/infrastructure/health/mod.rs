//! Health, Readiness and Metrics Endpoint
//!
//! | Route      | Answers |
//! |------------|---------|
//! | `/health`  | JSON snapshot: storage handle, workers, last spread cycle |
//! | `/healthz` | `200` while the process serves requests |
//! | `/readyz`  | `200` while a usable storage handle is held, JSON reason otherwise |
//! | `/metrics` | Prometheus text exposition |
//!
//! The server only reads shared state; nothing here can stall ingestion or
//! the spread monitor.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::{CycleReport, LastCycle};
use crate::domain::supervision::{WorkerState, WorkerStates, WorkerStatus};
use crate::infrastructure::metrics::get_metrics_handle;
use crate::infrastructure::storage::StorageHealth;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Report
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Rolled-up status.
    pub status: HealthStatus,
    /// Crate version.
    pub version: String,
    /// Seconds since the state was created.
    pub uptime_secs: u64,
    /// Wall clock at render time.
    pub current_time: DateTime<Utc>,
    /// Storage handle view.
    pub storage: StorageStatus,
    /// One entry per ingestion worker, in configuration order.
    pub workers: Vec<WorkerState>,
    /// Most recent spread cycle, if one completed.
    pub last_cycle: Option<CycleReport>,
}

/// Rolled-up status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Usable storage and every worker running.
    Healthy,
    /// Usable storage, cohort restart in progress.
    Degraded,
    /// No usable storage handle, or no workers configured.
    Unhealthy,
}

impl HealthStatus {
    /// Roll storage and worker states up into one status.
    #[must_use]
    pub fn assess(storage: StorageStatus, workers: &[WorkerState]) -> Self {
        if !storage.connected || workers.is_empty() {
            Self::Unhealthy
        } else if workers.iter().any(|w| w.status != WorkerStatus::Running) {
            Self::Degraded
        } else {
            Self::Healthy
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
            Self::Healthy | Self::Degraded => StatusCode::OK,
        }
    }
}

/// Storage handle view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StorageStatus {
    /// A handle is held and has not been flagged unusable.
    pub connected: bool,
    /// Failed storage operations since the last success.
    pub consecutive_failures: u32,
}

impl StorageStatus {
    const DETACHED: Self = Self {
        connected: false,
        consecutive_failures: 0,
    };
}

#[derive(Debug, Serialize)]
struct NotReady {
    ready: bool,
    reason: &'static str,
    consecutive_failures: u32,
}

// =============================================================================
// Shared State
// =============================================================================

/// Read side of the process state, shared with the HTTP handlers.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    workers: WorkerStates,
    last_cycle: LastCycle,
    storage: RwLock<Option<Arc<StorageHealth>>>,
}

impl HealthServerState {
    /// State with no storage handle attached.
    #[must_use]
    pub fn new(version: String, workers: WorkerStates, last_cycle: LastCycle) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            workers,
            last_cycle,
            storage: RwLock::new(None),
        }
    }

    /// Attach the live storage handle, or detach it (`None`) while the pool
    /// is being re-acquired.
    pub fn set_storage(&self, storage: Option<Arc<StorageHealth>>) {
        *self.storage.write() = storage;
    }

    /// Current storage view.
    #[must_use]
    pub fn storage_status(&self) -> StorageStatus {
        self.storage
            .read()
            .as_deref()
            .map_or(StorageStatus::DETACHED, |health| StorageStatus {
                connected: health.is_usable(),
                consecutive_failures: health.consecutive_failures(),
            })
    }

    /// Full `/health` report.
    #[must_use]
    pub fn report(&self) -> HealthReport {
        let storage = self.storage_status();
        let workers = self.workers.snapshot();
        HealthReport {
            status: HealthStatus::assess(storage, &workers),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            storage,
            workers,
            last_cycle: self.last_cycle.get(),
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// Serves the health routes until its token is cancelled.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Server for `0.0.0.0:port`.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// [`HealthServerError::Bind`] if the port is taken,
    /// [`HealthServerError::Serve`] if accepting connections fails.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HealthServerError::Bind {
                port: self.port,
                source,
            })?;
        serve(listener, self.state, self.cancel).await
    }
}

/// Serve on an already bound listener until `cancel` fires.
///
/// # Errors
///
/// [`HealthServerError::Serve`] if accepting connections fails.
pub async fn serve(
    listener: TcpListener,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
) -> Result<(), HealthServerError> {
    let local = listener.local_addr().map_err(HealthServerError::Serve)?;
    tracing::info!(addr = %local, "Health endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(HealthServerError::Serve)?;

    tracing::info!("Health endpoint stopped");
    Ok(())
}

fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/readyz", get(readiness))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

async fn health(State(state): State<Arc<HealthServerState>>) -> Response {
    let report = state.report();
    (report.status.http_status(), Json(report)).into_response()
}

async fn readiness(State(state): State<Arc<HealthServerState>>) -> Response {
    let storage = state.storage_status();
    if storage.connected {
        return StatusCode::OK.into_response();
    }
    let reason = if storage.consecutive_failures > 0 {
        "storage handle unusable"
    } else {
        "no storage handle"
    };
    let body = NotReady {
        ready: false,
        reason,
        consecutive_failures: storage.consecutive_failures,
    };
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

async fn prometheus() -> Response {
    match get_metrics_handle() {
        Some(handle) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}

/// Health endpoint failures.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Listening socket could not be bound.
    #[error("cannot bind health endpoint to port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Bind failure.
        #[source]
        source: io::Error,
    },

    /// Accept loop failed.
    #[error("health endpoint failed")]
    Serve(#[source] io::Error),
}
