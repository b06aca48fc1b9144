//! Quote Storage
//!
//! - [`postgres`]: `PostgreSQL` adapter used in production
//! - [`in_memory`]: process-local store for tests and development
//!
//! Both compute spreads with the same filters, so the alert engine sees the
//! same results from either.

use std::sync::atomic::{AtomicU32, Ordering};

use tokio_util::sync::CancellationToken;

use crate::application::ports::StorageError;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryQuoteStore;
pub use postgres::{PgConnector, PgStorage};

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Configuration(_) => Self::Connection(err.to_string()),
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => Self::Decode(err.to_string()),
            _ => Self::Query(err.to_string()),
        }
    }
}

// =============================================================================
// Storage Health
// =============================================================================

/// Consecutive-failure tracker for a storage handle.
///
/// Once `threshold` operations in a row have failed the handle is flagged
/// unusable and [`StorageHealth::unusable`] resolves. Any success resets
/// the count; the flag itself is permanent for this handle.
#[derive(Debug)]
pub struct StorageHealth {
    consecutive_failures: AtomicU32,
    threshold: u32,
    unusable: CancellationToken,
}

impl StorageHealth {
    /// Create a tracker; a zero threshold is treated as one.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            threshold: threshold.max(1),
            unusable: CancellationToken::new(),
        }
    }

    /// Record a successful operation.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
    }

    /// Record a failed operation. Returns `true` on the failure that flags
    /// the handle unusable.
    pub fn record_failure(&self) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.threshold && !self.unusable.is_cancelled() {
            tracing::error!(
                failures,
                threshold = self.threshold,
                "Storage handle marked unusable"
            );
            self.unusable.cancel();
            return true;
        }
        false
    }

    /// Current run of failures.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Whether the handle is still considered usable.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.unusable.is_cancelled()
    }

    /// Resolves once the handle has been flagged unusable.
    pub async fn unusable(&self) {
        self.unusable.cancelled().await;
    }
}
