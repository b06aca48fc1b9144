//! Spread Types
//!
//! A spread is a profitable price difference between selling on one
//! exchange (at its bid) and buying on another (at its ask). Spreads are
//! computed by storage from recent quotes; the domain only names them and
//! gives them a stable key.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::quote::Exchange;

// =============================================================================
// Spread Key
// =============================================================================

/// Stable identifier of an unordered exchange pair.
///
/// `SpreadKey::for_pair(a, b) == SpreadKey::for_pair(b, a)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SpreadKey(String);

impl SpreadKey {
    /// Hash of the two exchange names, sorted.
    #[must_use]
    pub fn for_pair(first: Exchange, second: Exchange) -> Self {
        let (low, high) = if first.as_str() <= second.as_str() {
            (first, second)
        } else {
            (second, first)
        };
        let digest = Sha256::digest(format!("{}|{}", low.as_str(), high.as_str()).as_bytes());
        Self(hex::encode(digest))
    }

    /// Hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Spread
// =============================================================================

/// Current cross-exchange spread between a sell side and a buy side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Spread {
    /// Unordered pair key.
    pub key: SpreadKey,
    /// Exchange to sell on (its bid is used).
    pub sell_to_exchange: Exchange,
    /// Exchange to buy from (its ask is used).
    pub buy_from_exchange: Exchange,
    /// `sell_price - buy_price`.
    pub spread_amount: Decimal,
    /// Spread as a percentage of the buy price, rounded to 2 places.
    pub spread_pct: Decimal,
    /// Bid on the sell side.
    pub sell_price: Decimal,
    /// Ask on the buy side.
    pub buy_price: Decimal,
    /// Observation time of the sell side quote.
    pub sell_to_ts: DateTime<Utc>,
    /// Observation time of the buy side quote.
    pub buy_from_ts: DateTime<Utc>,
}

impl Spread {
    /// Build a spread from both sides, deriving amount, percentage and key.
    ///
    /// Returns `None` when `buy_price` is zero.
    #[must_use]
    pub fn from_sides(
        sell_to_exchange: Exchange,
        sell_price: Decimal,
        sell_to_ts: DateTime<Utc>,
        buy_from_exchange: Exchange,
        buy_price: Decimal,
        buy_from_ts: DateTime<Utc>,
    ) -> Option<Self> {
        if buy_price.is_zero() {
            return None;
        }
        let spread_amount = sell_price - buy_price;
        let spread_pct = (spread_amount / buy_price * Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        Some(Self {
            key: SpreadKey::for_pair(sell_to_exchange, buy_from_exchange),
            sell_to_exchange,
            buy_from_exchange,
            spread_amount,
            spread_pct,
            sell_price,
            buy_price,
            sell_to_ts,
            buy_from_ts,
        })
    }
}

// =============================================================================
// Spread Query
// =============================================================================

/// Parameters of the storage-side spread computation.
///
/// These are filters applied while reading; the alert engine never looks
/// at them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadQuery {
    /// Only quotes newer than this are considered.
    pub lookback: Duration,
    /// Round-trip transaction cost, in percent of each leg.
    pub transaction_cost_pct: Decimal,
    /// Minimum `spread_pct` during active hours.
    pub min_profit_pct: Decimal,
    /// Minimum `spread_pct` outside active hours.
    pub off_hours_min_profit_pct: Decimal,
    /// IANA time zone the active hours are expressed in.
    pub timezone: String,
    /// First active hour (inclusive, 0-23).
    pub active_from_hour: u32,
    /// Last active hour (inclusive, 0-23).
    pub active_until_hour: u32,
    /// Maximum distance between the two legs' observation times.
    pub max_leg_skew: Duration,
}

impl Default for SpreadQuery {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(600),
            transaction_cost_pct: Decimal::new(25, 2),
            min_profit_pct: Decimal::ONE,
            off_hours_min_profit_pct: Decimal::TWO,
            timezone: "Europe/Amsterdam".to_string(),
            active_from_hour: 7,
            active_until_hour: 23,
            max_leg_skew: Duration::from_secs(5),
        }
    }
}

impl SpreadQuery {
    /// Transaction cost as a ratio of price (`0.25` percent -> `0.0025`).
    #[must_use]
    pub fn transaction_cost_ratio(&self) -> Decimal {
        self.transaction_cost_pct / Decimal::ONE_HUNDRED
    }

    /// Whether a spread clears the cost filter for the given legs.
    ///
    /// Mirrors the storage-side filter so in-memory adapters agree with it.
    #[must_use]
    pub fn clears_costs(&self, sell_price: Decimal, buy_price: Decimal) -> bool {
        let ratio = self.transaction_cost_ratio();
        sell_price - buy_price > sell_price * ratio + buy_price * ratio
    }

    /// Whether the local hour lies in the active window.
    #[must_use]
    pub fn is_active_hour(&self, local_hour: u32) -> bool {
        (self.active_from_hour..=self.active_until_hour).contains(&local_hour)
    }

    /// Profitability filter: the active-hours threshold applies only inside
    /// the window, the off-hours threshold always.
    #[must_use]
    pub fn is_profitable(&self, spread_pct: Decimal, local_hour: u32) -> bool {
        (spread_pct > self.min_profit_pct && self.is_active_hour(local_hour))
            || spread_pct > self.off_hours_min_profit_pct
    }
}
