//! Bitstamp v2 ticker.
//!
//! `GET /api/v2/ticker/btceur/` answers with a flat object of decimal
//! strings and a unix-seconds `timestamp`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{carry_extra, decimal_field, exchange_symbol, object, optional_decimal, quote_for};
use crate::domain::quote::{CurrencyPair, NormalizationError, Quote, RawMessage};

const TICKER_ENDPOINT: &str = "https://www.bitstamp.net/api/v2/ticker";

/// Ticker URL for a pair.
#[must_use]
pub fn ticker_url(pair: &CurrencyPair) -> String {
    format!(
        "{TICKER_ENDPOINT}/{}{}/",
        exchange_symbol(&pair.base).to_lowercase(),
        exchange_symbol(&pair.quote).to_lowercase()
    )
}

/// Normalize a Bitstamp ticker response.
///
/// # Errors
///
/// - [`NormalizationError::MissingField`] if `timestamp`, `bid` or `ask` is absent
/// - [`NormalizationError::InvalidTimestamp`] if `timestamp` is not unix seconds
/// - [`NormalizationError::InvalidDecimal`] for malformed prices
pub fn normalize(raw: &RawMessage) -> Result<Quote, NormalizationError> {
    let ticker = object(&raw.payload, "bitstamp ticker")?;
    let observed_at = timestamp(ticker)?;

    let bid_price = decimal_field(ticker, "bid")?;
    let ask_price = decimal_field(ticker, "ask")?;

    let mut quote = quote_for(raw, observed_at, bid_price, ask_price);
    quote.last_trade_price = optional_decimal(ticker, "last")?;
    quote.volume = optional_decimal(ticker, "volume")?;

    let mut extras = Map::new();
    carry_extra(&mut extras, "high_24h", ticker, "high");
    carry_extra(&mut extras, "low_24h", ticker, "low");
    carry_extra(&mut extras, "vwap_24h", ticker, "vwap");
    carry_extra(&mut extras, "opening", ticker, "open");
    quote.extras = extras;

    Ok(quote)
}

fn timestamp(ticker: &Map<String, Value>) -> Result<DateTime<Utc>, NormalizationError> {
    let value = ticker
        .get("timestamp")
        .filter(|v| !v.is_null())
        .ok_or_else(|| NormalizationError::MissingField("timestamp".to_string()))?;

    let secs = match value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    };

    secs.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
        .ok_or_else(|| NormalizationError::InvalidTimestamp(value.to_string()))
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;
    use test_case::test_case;

    use super::*;
    use crate::domain::quote::Exchange;

    fn raw(payload: Value) -> RawMessage {
        let now = Utc::now();
        RawMessage {
            exchange: Exchange::Bitstamp,
            pair: CurrencyPair::new("XBT", "EUR"),
            requested_at: now,
            received_at: now,
            payload,
        }
    }

    fn ticker() -> Value {
        json!({
            "timestamp": "1700000000",
            "bid": "35001.00",
            "ask": "35012.00",
            "last": "35005",
            "volume": "421.5",
            "high": "35300",
            "low": "34600",
            "vwap": "34980",
            "open": "34800"
        })
    }

    #[test]
    fn ticker_url_uses_bitstamp_symbols() {
        assert_eq!(
            ticker_url(&CurrencyPair::new("XBT", "EUR")),
            "https://www.bitstamp.net/api/v2/ticker/btceur/"
        );
    }

    #[test]
    fn normalizes_ticker() {
        let quote = normalize(&raw(ticker())).unwrap();

        assert_eq!(quote.exchange, Exchange::Bitstamp);
        assert_eq!(quote.base, "XBT");
        assert_eq!(
            quote.observed_at,
            DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap()
        );
        assert_eq!(quote.bid_price, Decimal::from(35_001));
        assert_eq!(quote.ask_price, Decimal::from(35_012));
        assert_eq!(quote.last_trade_price, Some(Decimal::from(35_005)));
        assert_eq!(quote.volume, Some(Decimal::new(4215, 1)));
        assert_eq!(quote.extras["high_24h"], json!("35300"));
        assert_eq!(quote.extras["opening"], json!("34800"));
    }

    #[test]
    fn numeric_timestamp_is_accepted() {
        let mut payload = ticker();
        payload["timestamp"] = json!(1_700_000_000);
        assert!(normalize(&raw(payload)).is_ok());
    }

    #[test]
    fn missing_timestamp_is_reported() {
        let mut payload = ticker();
        payload.as_object_mut().unwrap().remove("timestamp");
        assert_eq!(
            normalize(&raw(payload)),
            Err(NormalizationError::MissingField("timestamp".to_string()))
        );
    }

    #[test_case("timestamp", json!("yesterday") ; "bad timestamp")]
    #[test_case("bid", json!("n/a") ; "bad bid")]
    #[test_case("ask", Value::Null ; "null ask")]
    fn malformed_fields_are_rejected(field: &str, value: Value) {
        let mut payload = ticker();
        payload[field] = value;
        assert!(normalize(&raw(payload)).is_err());
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let payload = json!({"timestamp": "1700000000", "bid": "1", "ask": "2"});
        let quote = normalize(&raw(payload)).unwrap();
        assert_eq!(quote.last_trade_price, None);
        assert!(quote.extras.is_empty());
    }
}
