#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Spread Sentinel - Cross-Exchange Spread Monitor
//!
//! Ingests best bid/ask quotes from several crypto exchanges into
//! `PostgreSQL`, evaluates cross-exchange spreads on a timer and emails a
//! deduplicated report once a profitable spread has stayed open long enough.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Core market and alerting types
//!   - `quote`: Exchanges, raw messages and normalized quotes
//!   - `spread`: Spreads, their keys and storage-side filters
//!   - `tracking`: Open/cooldown windows and the spread tracker
//!   - `supervision`: Worker states and the cohort restart policy
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Interfaces for exchange sources, storage and alert delivery
//!   - `services`: Ingestion supervisor, spread monitor, pool acquirer
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchanges`: Kraken/Bitstamp polling, Coinbase WebSocket, normalizers
//!   - `storage`: `PostgreSQL` and in-memory quote stores
//!   - `alerting`: Report rendering and SMTP delivery
//!   - `config`: Environment configuration and startup validation
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! Kraken REST ----+
//!                 |   +-------------+    +----------+    +---------------+
//! Bitstamp REST --+-->|  Ingestion  |--->| Postgres |--->| Spread        |--> SMTP
//!                 |   |  Supervisor |    |  quotes  |    | Monitor       |
//! Coinbase WS ----+   +-------------+    +----------+    +---------------+
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::quote::{CurrencyPair, Exchange, NormalizationError, Quote, RawMessage};
pub use domain::spread::{Spread, SpreadKey, SpreadQuery};
pub use domain::supervision::{RestartConfig, WorkerState, WorkerStates, WorkerStatus};
pub use domain::tracking::{AlertBatch, SpreadTracker, TrackingReset, TrackingWindow};

// Application services
pub use application::services::{
    CycleReport, IngestionSupervisor, LastCycle, MonitorConfig, PoolAcquirer,
    PoolAcquisitionError, PoolRetryConfig, SpreadMonitor, SupervisorConfig,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, SentinelConfig, validate_startup};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
