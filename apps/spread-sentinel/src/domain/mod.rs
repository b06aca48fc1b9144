//! Domain Layer - Core market and alerting types.
//!
//! This layer contains the canonical quote and spread types together with
//! the pure state machines that decide when to alert and how to restart
//! ingestion workers. Nothing here performs I/O.

/// Normalized exchange quotes and raw exchange messages.
pub mod quote;

/// Cross-exchange spreads and their pair-order independent keys.
pub mod spread;

/// Spread tracking windows, cooldowns and alert batches.
pub mod tracking;

/// Worker states and the cohort restart policy.
pub mod supervision;
