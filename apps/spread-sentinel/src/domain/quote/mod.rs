//! Quote Types
//!
//! Canonical representation of a best bid/ask snapshot from one exchange,
//! plus the raw message envelope sources hand to the normalizers.
//!
//! Exchange specific fields that have no place in the canonical shape are
//! carried in [`Quote::extras`] instead of widening the struct.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// =============================================================================
// Exchange
// =============================================================================

/// Exchanges the sentinel knows how to ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Exchange {
    /// Kraken REST ticker.
    Kraken,
    /// Bitstamp REST ticker.
    Bitstamp,
    /// Coinbase Exchange (formerly GDAX), REST or WebSocket ticker.
    Coinbase,
}

impl Exchange {
    /// Every supported exchange.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Kraken, Self::Bitstamp, Self::Coinbase]
    }

    /// Stable lowercase name, used in storage rows and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Kraken => "kraken",
            Self::Bitstamp => "bitstamp",
            Self::Coinbase => "coinbase",
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kraken" => Ok(Self::Kraken),
            "bitstamp" => Ok(Self::Bitstamp),
            "coinbase" | "gdax" => Ok(Self::Coinbase),
            _ => Err(UnknownExchange(s.to_string())),
        }
    }
}

/// Returned when an exchange name does not match any supported exchange.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown exchange: {0}")]
pub struct UnknownExchange(pub String);

// =============================================================================
// Currency Pair
// =============================================================================

/// A base/quote currency pair, e.g. `XBT/EUR`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CurrencyPair {
    /// Base currency symbol, normalized.
    pub base: String,
    /// Quote currency symbol, normalized.
    pub quote: String,
}

impl CurrencyPair {
    /// Create a pair, normalizing both symbols.
    #[must_use]
    pub fn new(base: &str, quote: &str) -> Self {
        Self {
            base: normalize_symbol(base),
            quote: normalize_symbol(quote),
        }
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

/// Normalize a currency symbol so rows from different exchanges compare.
///
/// Exchanges disagree on the bitcoin ticker; everything is stored as `XBT`.
#[must_use]
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    if upper == "BTC" { "XBT".to_string() } else { upper }
}

// =============================================================================
// Raw Message
// =============================================================================

/// One undecoded message pulled from an exchange source.
#[derive(Debug, Clone)]
pub struct RawMessage {
    /// Exchange that produced the message.
    pub exchange: Exchange,
    /// Pair the source was configured for.
    pub pair: CurrencyPair,
    /// When the request was issued (equal to `received_at` for streams).
    pub requested_at: DateTime<Utc>,
    /// When the response was fully received.
    pub received_at: DateTime<Utc>,
    /// Decoded JSON body, or the raw text as a JSON string when the body
    /// was not JSON.
    pub payload: Value,
}

impl RawMessage {
    /// Decode a message body. Text that is not JSON is kept verbatim as a
    /// string payload so the normalizer, not the source, rejects it.
    #[must_use]
    pub fn payload_from_text(text: &str) -> Value {
        serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_owned()))
    }

    /// Midpoint between request and response, for exchanges that do not
    /// timestamp their tickers.
    #[must_use]
    pub fn round_trip_midpoint(&self) -> DateTime<Utc> {
        self.requested_at + (self.received_at - self.requested_at) / 2
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Normalized snapshot of one exchange market at one instant.
///
/// `bid_price <= ask_price` is not enforced; exchanges occasionally publish
/// crossed books and those rows are still worth storing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    /// Observation time, always UTC.
    pub observed_at: DateTime<Utc>,
    /// Source exchange.
    pub exchange: Exchange,
    /// Base currency symbol.
    pub base: String,
    /// Quote currency symbol.
    pub quote_currency: String,
    /// Best bid.
    pub bid_price: Decimal,
    /// Best ask.
    pub ask_price: Decimal,
    /// Last trade price, if the exchange reports one.
    pub last_trade_price: Option<Decimal>,
    /// Rolling 24h volume, if the exchange reports one.
    pub volume: Option<Decimal>,
    /// Exchange specific fields.
    pub extras: Map<String, Value>,
}

// =============================================================================
// Normalization Error
// =============================================================================

/// Why a raw message could not be turned into a [`Quote`].
///
/// Normalization errors drop the message; they never fail the worker.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    /// Required field absent.
    #[error("missing field: {0}")]
    MissingField(String),

    /// Field present but not a decimal number.
    #[error("invalid decimal in {field}: {value}")]
    InvalidDecimal {
        /// Field name.
        field: String,
        /// Offending value as received.
        value: String,
    },

    /// Timestamp field could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The exchange answered with an error body.
    #[error("exchange reported error: {0}")]
    ExchangeError(String),

    /// Payload does not have the expected structure.
    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(String),
}
