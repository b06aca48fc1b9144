//! Configuration validation at startup.

use rust_decimal::Decimal;

use super::settings::{ConfigError, SentinelConfig};
use crate::domain::tracking::{TrackingError, TrackingWindow};

/// Result of startup validation.
#[derive(Debug)]
pub struct StartupValidation {
    /// Tracking window built from the alert settings.
    pub window: TrackingWindow,
    /// Warning messages (non-fatal).
    pub warnings: Vec<String>,
}

/// Validate configuration at startup.
///
/// Rejects settings the services cannot run with and collects warnings for
/// settings that are legal but probably unintended.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidValue`] naming the first offending setting.
pub fn validate_startup(config: &SentinelConfig) -> Result<StartupValidation, ConfigError> {
    let window = TrackingWindow::new(
        config.alerting.open_for,
        config.alerting.dont_email_newer_than,
        config.alerting.reset,
    )
    .map_err(|e| match e {
        TrackingError::InvalidWindow { .. } => invalid("SENTINEL_OPEN_FOR_SECS", e.to_string()),
        TrackingError::OutOfRange => invalid("SENTINEL_DONT_EMAIL_NEWER_THAN_SECS", e.to_string()),
    })?;

    if config.ingestion.exchanges.is_empty() {
        return Err(invalid("SENTINEL_EXCHANGES", "at least one exchange is required"));
    }

    if config.database.retry.attempts == 0 {
        return Err(invalid("SENTINEL_POOL_RETRY_ATTEMPTS", "must be at least 1"));
    }

    if config.database.max_connections == 0
        || config.database.min_connections > config.database.max_connections
    {
        return Err(invalid(
            "SENTINEL_POOL_MAX_CONNECTIONS",
            format!(
                "need 0 < min ({}) <= max ({})",
                config.database.min_connections, config.database.max_connections
            ),
        ));
    }

    if config.alerting.poll_interval.is_zero() {
        return Err(invalid("SENTINEL_SPREAD_POLL_INTERVAL_SECS", "must be positive"));
    }

    if config.ingestion.idle_timeout.is_zero() {
        return Err(invalid("SENTINEL_IDLE_TIMEOUT_SECS", "must be positive"));
    }

    if config.ingestion.keepalive_interval.is_zero() {
        return Err(invalid("SENTINEL_KEEPALIVE_INTERVAL_SECS", "must be positive"));
    }

    let restart = &config.ingestion.restart;
    if !restart.multiplier.is_finite() || restart.multiplier < 1.0 {
        return Err(invalid(
            "SENTINEL_RESTART_DELAY_MULTIPLIER",
            format!("must be a finite number >= 1, got {}", restart.multiplier),
        ));
    }

    // NaN fails the range check too.
    if !(0.0..=1.0).contains(&restart.jitter_factor) {
        return Err(invalid(
            "SENTINEL_RESTART_JITTER",
            format!("must be within 0-1, got {}", restart.jitter_factor),
        ));
    }

    let query = &config.alerting.query;
    if query.active_from_hour > 23 || query.active_until_hour > 23 {
        return Err(invalid("SENTINEL_ACTIVE_FROM_HOUR", "hours must be within 0-23"));
    }

    if !is_zone_name(&query.timezone) {
        return Err(invalid(
            "SENTINEL_ACTIVE_TIMEZONE",
            format!("{:?} is not a time zone name", query.timezone),
        ));
    }

    if query.transaction_cost_pct < Decimal::ZERO {
        return Err(invalid("SENTINEL_TRANSACTION_COST_PCT", "must not be negative"));
    }

    if config.smtp.recipients.is_empty() {
        return Err(invalid("ALERT_RECIPIENTS", "at least one recipient is required"));
    }

    let mut warnings = Vec::new();

    if config.ingestion.exchanges.len() < 2 {
        warnings.push("only one exchange configured, no spread can ever be found".to_string());
    }

    if query.active_from_hour > query.active_until_hour {
        warnings.push(format!(
            "active hours {}-{} are empty, the off-hours threshold always applies",
            query.active_from_hour, query.active_until_hour
        ));
    }

    if query.off_hours_min_profit_pct < query.min_profit_pct {
        warnings.push("off-hours threshold is below the active-hours threshold".to_string());
    }

    if config.alerting.poll_interval > config.alerting.open_for {
        warnings.push(format!(
            "spread poll interval {:?} exceeds open_for {:?}, alerts fire late",
            config.alerting.poll_interval, config.alerting.open_for
        ));
    }

    Ok(StartupValidation { window, warnings })
}

/// Shape check for IANA names (`Europe/Amsterdam`, `Etc/GMT+1`, `UTC`).
/// Whether the zone exists is checked against the database once connected.
fn is_zone_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-' | '+' | '.'))
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use test_case::test_case;

    use super::*;
    use crate::domain::quote::Exchange;
    use crate::infrastructure::config::{
        AlertSettings, DatabaseSettings, IngestionSettings, ServerSettings, SmtpCredentials,
        SmtpSettings,
    };

    fn config() -> SentinelConfig {
        SentinelConfig {
            database: DatabaseSettings::with_url("postgres://localhost/quotes".to_string()),
            ingestion: IngestionSettings::default(),
            alerting: AlertSettings::default(),
            smtp: SmtpSettings {
                host: "smtp.example.com".to_string(),
                port: 587,
                credentials: SmtpCredentials::new("u".to_string(), "p".to_string()),
                from: "alerts@example.com".to_string(),
                recipients: vec!["ops@example.com".to_string()],
            },
            server: ServerSettings::default(),
        }
    }

    #[test]
    fn defaults_are_valid() {
        let validation = validate_startup(&config()).unwrap();
        assert!(validation.warnings.is_empty());
    }

    #[test]
    fn open_for_must_be_below_cooldown() {
        let mut config = config();
        config.alerting.open_for = Duration::from_secs(7200);
        let err = validate_startup(&config).unwrap_err();
        assert!(err.to_string().contains("SENTINEL_OPEN_FOR_SECS"));
    }

    #[test]
    fn empty_exchange_list_is_rejected() {
        let mut config = config();
        config.ingestion.exchanges.clear();
        assert!(validate_startup(&config).is_err());
    }

    #[test]
    fn zero_retry_attempts_are_rejected() {
        let mut config = config();
        config.database.retry.attempts = 0;
        assert!(validate_startup(&config).is_err());
    }

    #[test]
    fn zero_keepalive_is_rejected() {
        let mut config = config();
        config.ingestion.keepalive_interval = Duration::ZERO;
        let err = validate_startup(&config).unwrap_err();
        assert!(err.to_string().contains("SENTINEL_KEEPALIVE_INTERVAL_SECS"));
    }

    #[test_case(f64::NAN ; "nan")]
    #[test_case(f64::INFINITY ; "infinite")]
    #[test_case(0.5 ; "shrinking")]
    fn unusable_restart_multiplier_is_rejected(multiplier: f64) {
        let mut config = config();
        config.ingestion.restart.multiplier = multiplier;
        let err = validate_startup(&config).unwrap_err();
        assert!(err.to_string().contains("SENTINEL_RESTART_DELAY_MULTIPLIER"));
    }

    #[test_case(f64::NAN ; "nan")]
    #[test_case(f64::NEG_INFINITY ; "infinite")]
    #[test_case(-0.1 ; "negative")]
    #[test_case(1.5 ; "above one")]
    fn unusable_restart_jitter_is_rejected(jitter: f64) {
        let mut config = config();
        config.ingestion.restart.jitter_factor = jitter;
        let err = validate_startup(&config).unwrap_err();
        assert!(err.to_string().contains("SENTINEL_RESTART_JITTER"));
    }

    #[test]
    fn jitter_bounds_are_inclusive() {
        let mut config = config();
        config.ingestion.restart.jitter_factor = 0.0;
        assert!(validate_startup(&config).is_ok());
        config.ingestion.restart.jitter_factor = 1.0;
        assert!(validate_startup(&config).is_ok());
    }

    #[test_case("Europe/Amsterdam")]
    #[test_case("UTC")]
    #[test_case("Etc/GMT+1")]
    #[test_case("America/Argentina/Buenos_Aires")]
    fn zone_names_are_accepted(zone: &str) {
        let mut config = config();
        config.alerting.query.timezone = zone.to_string();
        assert!(validate_startup(&config).is_ok());
    }

    #[test_case("" ; "empty")]
    #[test_case("Europe Amsterdam" ; "space")]
    #[test_case("Europe/" ; "trailing slash")]
    #[test_case("../etc/passwd" ; "relative path")]
    #[test_case("Europe/Amsterdam'" ; "quote")]
    fn malformed_zone_names_are_rejected(zone: &str) {
        let mut config = config();
        config.alerting.query.timezone = zone.to_string();
        let err = validate_startup(&config).unwrap_err();
        assert!(err.to_string().contains("SENTINEL_ACTIVE_TIMEZONE"));
    }

    #[test]
    fn single_exchange_warns() {
        let mut config = config();
        config.ingestion.exchanges = vec![Exchange::Kraken];
        let validation = validate_startup(&config).unwrap();
        assert_eq!(validation.warnings.len(), 1);
    }
}
