//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the ingestion, monitoring and pool acquisition
//! services together with the port interfaces they drive.

/// Port interfaces for exchanges, storage and alert delivery.
pub mod ports;

/// Application services: ingestion supervisor, spread monitor, pool acquirer.
pub mod services;
