//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `SourceFactory` / `ExchangeSource`: lazy, potentially infinite
//!   sequence of raw exchange messages
//! - `QuoteNormalizer`: raw message to canonical quote
//! - `QuoteSink`: quote append
//! - `SpreadRepository`: current cross-exchange spreads
//! - `AlertDispatcher`: report delivery
//! - `PoolConnector`: opens a storage pool handle

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::quote::{Exchange, NormalizationError, Quote, RawMessage};
use crate::domain::spread::{Spread, SpreadQuery};
use crate::domain::tracking::AlertBatch;

// =============================================================================
// Errors
// =============================================================================

/// Failure of an exchange source. Ends the worker and restarts its cohort.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Network or protocol failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP response.
    #[error("unexpected HTTP status {0}")]
    Http(u16),

    /// Remote end closed the stream.
    #[error("connection closed")]
    ConnectionClosed,

    /// No message arrived within the idle timeout.
    #[error("no message within {0:?}")]
    IdleTimeout(Duration),
}

/// Storage failure on append or query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Could not obtain or use a connection.
    #[error("storage connection error: {0}")]
    Connection(String),

    /// Statement failed.
    #[error("storage query error: {0}")]
    Query(String),

    /// Row could not be mapped back to a domain type.
    #[error("storage decode error: {0}")]
    Decode(String),
}

/// Alert delivery failure. Logged by the caller; the batch is not retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// Sender or recipient address invalid.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Message could not be built.
    #[error("message build failed: {0}")]
    Build(String),

    /// Relay rejected the message or was unreachable.
    #[error("transport failed: {0}")]
    Transport(String),
}

// =============================================================================
// Exchange Ports
// =============================================================================

/// An open connection to one exchange feed.
#[async_trait]
pub trait ExchangeSource: Send {
    /// Wait for the next raw message.
    ///
    /// Polling sources pace themselves; streaming sources return as soon as
    /// a frame arrives.
    async fn next(&mut self) -> Result<RawMessage, SourceError>;
}

/// Opens fresh [`ExchangeSource`]s, once per cohort launch.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// Exchange this factory connects to.
    fn exchange(&self) -> Exchange;

    /// Open a new source.
    async fn open(&self) -> Result<Box<dyn ExchangeSource>, SourceError>;
}

/// Pure mapping from raw exchange message to canonical quote.
pub trait QuoteNormalizer: Send + Sync {
    /// `Ok(None)` for messages that are well formed but carry no quote
    /// (subscription acks, heartbeats).
    fn normalize(&self, raw: &RawMessage) -> Result<Option<Quote>, NormalizationError>;
}

// =============================================================================
// Storage Ports
// =============================================================================

/// Append-only quote storage.
#[async_trait]
pub trait QuoteSink: Send + Sync {
    /// Persist one quote.
    async fn append(&self, quote: &Quote) -> Result<(), StorageError>;
}

/// Read side: current spreads computed from recent quotes.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SpreadRepository: Send + Sync {
    /// Current spreads, ordered by `spread_pct` descending.
    async fn query_spreads(&self, query: &SpreadQuery) -> Result<Vec<Spread>, StorageError>;
}

/// Opens a storage pool from a DSN.
#[async_trait]
pub trait PoolConnector: Send + Sync {
    /// Pool handle type.
    type Handle: Send;

    /// One connection attempt.
    async fn connect(&self, dsn: &str) -> Result<Self::Handle, StorageError>;
}

// =============================================================================
// Alert Port
// =============================================================================

/// Delivers one report for a non-empty batch.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertDispatcher: Send + Sync {
    /// Single delivery attempt.
    async fn send(&self, batch: &AlertBatch) -> Result<(), DeliveryError>;
}
