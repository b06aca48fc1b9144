//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `IngestionSupervisor`: one worker per exchange source, cohort restarts
//! - `SpreadMonitor`: periodic spread evaluation and alert dispatch
//! - `PoolAcquirer`: bounded, fixed-delay storage pool acquisition

mod ingestion;
mod monitor;
mod pool;

pub use ingestion::{DEFAULT_IDLE_TIMEOUT, IngestionSupervisor, SupervisorConfig};
pub use monitor::{CycleReport, DEFAULT_POLL_INTERVAL, LastCycle, MonitorConfig, SpreadMonitor};
pub use pool::{
    DEFAULT_POOL_RETRY_ATTEMPTS, DEFAULT_POOL_RETRY_DELAY, PoolAcquirer, PoolAcquisitionError,
    PoolRetryConfig, redact_dsn,
};
