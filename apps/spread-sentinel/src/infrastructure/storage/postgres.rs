//! `PostgreSQL` quote storage via `SQLx`.
//!
//! Quotes are appended to a single `quotes` table. Spreads are computed in
//! one statement: the latest quote per exchange inside the lookback window,
//! every ordered pair of distinct exchanges, then the cost, time-alignment
//! and profitability filters.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::StorageHealth;
use crate::application::ports::{PoolConnector, QuoteSink, SpreadRepository, StorageError};
use crate::domain::quote::{Exchange, Quote};
use crate::domain::spread::{Spread, SpreadKey, SpreadQuery};
use crate::infrastructure::metrics::{self, StorageOperation};

const CREATE_QUOTES_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS quotes (
        observed_at      TIMESTAMPTZ NOT NULL,
        exchange         TEXT        NOT NULL,
        base             TEXT        NOT NULL,
        quote_currency   TEXT        NOT NULL,
        bid_price        NUMERIC     NOT NULL,
        ask_price        NUMERIC     NOT NULL,
        last_trade_price NUMERIC,
        volume           NUMERIC,
        extras           JSONB       NOT NULL DEFAULT '{}'::jsonb
    )
";

const CREATE_QUOTES_INDEX: &str = r"
    CREATE INDEX IF NOT EXISTS quotes_exchange_observed_at_idx
        ON quotes (exchange, observed_at DESC)
";

const INSERT_QUOTE: &str = r"
    INSERT INTO quotes (
        observed_at, exchange, base, quote_currency, bid_price, ask_price,
        last_trade_price, volume, extras
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
";

const TIMEZONE_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM pg_timezone_names WHERE name = $1)";

const SELECT_SPREADS: &str = r"
    WITH latest AS (
        SELECT DISTINCT ON (exchange) exchange, observed_at, bid_price, ask_price
        FROM quotes
        WHERE observed_at > now() - make_interval(secs => $1)
        ORDER BY exchange, observed_at DESC
    ),
    candidates AS (
        SELECT
            sell.exchange    AS sell_to_exchange,
            buy.exchange     AS buy_from_exchange,
            sell.bid_price   AS sell_price,
            buy.ask_price    AS buy_price,
            sell.observed_at AS sell_to_ts,
            buy.observed_at  AS buy_from_ts,
            sell.bid_price - buy.ask_price AS spread_amount,
            round((sell.bid_price - buy.ask_price) / buy.ask_price * 100, 2) AS spread_pct
        FROM latest AS sell
        CROSS JOIN latest AS buy
        WHERE sell.exchange <> buy.exchange
          AND buy.ask_price > 0
    )
    SELECT *
    FROM candidates
    WHERE spread_amount > (sell_price + buy_price) * $2 / 100
      AND abs(extract(epoch FROM sell_to_ts - buy_from_ts)) <= $3
      AND (
            (spread_pct > $4
             AND extract(hour FROM now() AT TIME ZONE $6) BETWEEN $7 AND $8)
         OR spread_pct > $5
      )
    ORDER BY spread_pct DESC, sell_to_exchange, buy_from_exchange
";

// =============================================================================
// Connector
// =============================================================================

/// Opens `PgPool`s with fixed sizing. One call is one attempt; retries
/// belong to the pool acquirer.
#[derive(Debug, Clone, Copy)]
pub struct PgConnector {
    min_connections: u32,
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(min_connections: u32, max_connections: u32, acquire_timeout: Duration) -> Self {
        Self {
            min_connections,
            max_connections,
            acquire_timeout,
        }
    }
}

#[async_trait]
impl PoolConnector for PgConnector {
    type Handle = PgPool;

    async fn connect(&self, dsn: &str) -> Result<PgPool, StorageError> {
        let pool = PgPoolOptions::new()
            .min_connections(self.min_connections)
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(dsn)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        tracing::info!(
            min_connections = self.min_connections,
            max_connections = self.max_connections,
            "PostgreSQL connection pool initialized"
        );

        Ok(pool)
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Quote sink and spread repository over one pool.
#[derive(Debug, Clone)]
pub struct PgStorage {
    pool: PgPool,
    health: Arc<StorageHealth>,
}

impl PgStorage {
    /// Wrap an acquired pool.
    #[must_use]
    pub fn new(pool: PgPool, failure_threshold: u32) -> Self {
        Self {
            pool,
            health: Arc::new(StorageHealth::new(failure_threshold)),
        }
    }

    /// Underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Failure tracker shared by every clone of this storage.
    #[must_use]
    pub fn health(&self) -> Arc<StorageHealth> {
        Arc::clone(&self.health)
    }

    /// Create the `quotes` table and its index if missing.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if either statement fails.
    pub async fn migrate(&self) -> Result<(), StorageError> {
        let result = async {
            sqlx::query(CREATE_QUOTES_TABLE).execute(&self.pool).await?;
            sqlx::query(CREATE_QUOTES_INDEX).execute(&self.pool).await?;
            Ok::<_, sqlx::Error>(())
        }
        .await;

        self.track(StorageOperation::Migrate, result.map_err(StorageError::from))?;
        tracing::info!("Quote schema ready");
        Ok(())
    }

    /// Whether the server knows the time zone `name`. Spread queries
    /// evaluate active hours in it, so an unknown zone fails every cycle.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] if the lookup itself fails.
    pub async fn knows_timezone(&self, name: &str) -> Result<bool, StorageError> {
        let result = sqlx::query_scalar::<_, bool>(TIMEZONE_EXISTS)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(StorageError::from);

        self.track(StorageOperation::Query, result)
    }

    /// Close the pool, waiting for checked-out connections to return.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL connection pool closed");
    }

    fn track<T>(
        &self,
        operation: StorageOperation,
        result: Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        match &result {
            Ok(_) => self.health.record_success(),
            Err(e) => {
                tracing::debug!(?operation, error = %e, "Storage operation failed");
                metrics::record_storage_failure(operation);
                self.health.record_failure();
            }
        }
        result
    }
}

#[async_trait]
impl QuoteSink for PgStorage {
    async fn append(&self, quote: &Quote) -> Result<(), StorageError> {
        let result = sqlx::query(INSERT_QUOTE)
            .bind(quote.observed_at)
            .bind(quote.exchange.as_str())
            .bind(&quote.base)
            .bind(&quote.quote_currency)
            .bind(quote.bid_price)
            .bind(quote.ask_price)
            .bind(quote.last_trade_price)
            .bind(quote.volume)
            .bind(Json(&quote.extras))
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(StorageError::from);

        self.track(StorageOperation::Append, result)
    }
}

#[async_trait]
impl SpreadRepository for PgStorage {
    async fn query_spreads(&self, query: &SpreadQuery) -> Result<Vec<Spread>, StorageError> {
        let result = sqlx::query(SELECT_SPREADS)
            .bind(query.lookback.as_secs_f64())
            .bind(query.transaction_cost_pct)
            .bind(query.max_leg_skew.as_secs_f64())
            .bind(query.min_profit_pct)
            .bind(query.off_hours_min_profit_pct)
            .bind(&query.timezone)
            .bind(hour(query.active_from_hour))
            .bind(hour(query.active_until_hour))
            .fetch_all(&self.pool)
            .await
            .map_err(StorageError::from)
            .and_then(|rows| rows.iter().map(row_to_spread).collect());

        self.track(StorageOperation::Query, result)
    }
}

fn hour(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn exchange_column(row: &PgRow, column: &str) -> Result<Exchange, StorageError> {
    let name: String = row.try_get(column)?;
    Exchange::from_str(&name).map_err(|e| StorageError::Decode(e.to_string()))
}

fn row_to_spread(row: &PgRow) -> Result<Spread, StorageError> {
    let sell_to_exchange = exchange_column(row, "sell_to_exchange")?;
    let buy_from_exchange = exchange_column(row, "buy_from_exchange")?;

    Ok(Spread {
        key: SpreadKey::for_pair(sell_to_exchange, buy_from_exchange),
        sell_to_exchange,
        buy_from_exchange,
        spread_amount: row.try_get::<Decimal, _>("spread_amount")?,
        spread_pct: row.try_get::<Decimal, _>("spread_pct")?,
        sell_price: row.try_get::<Decimal, _>("sell_price")?,
        buy_price: row.try_get::<Decimal, _>("buy_price")?,
        sell_to_ts: row.try_get::<DateTime<Utc>, _>("sell_to_ts")?,
        buy_from_ts: row.try_get::<DateTime<Utc>, _>("buy_from_ts")?,
    })
}
