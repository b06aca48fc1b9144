//! Configuration Module
//!
//! Configuration loading and startup validation for the sentinel.

mod settings;
mod validation;

pub use settings::{
    AlertSettings, ConfigError, DatabaseSettings, IngestionSettings, SentinelConfig,
    ServerSettings, SmtpCredentials, SmtpSettings, parse_exchange_list,
};
pub use validation::{StartupValidation, validate_startup};
