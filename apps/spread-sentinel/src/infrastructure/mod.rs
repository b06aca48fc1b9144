//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Exchange sources (REST polling, Coinbase WebSocket) and normalizers.
pub mod exchanges;

/// Quote storage adapters (`PostgreSQL`, in-memory).
pub mod storage;

/// Report rendering and SMTP delivery.
pub mod alerting;

/// Configuration loading and startup validation.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
