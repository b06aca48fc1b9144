//! Coinbase Exchange ticker, REST and WebSocket.
//!
//! The REST ticker (`/products/BTC-EUR/ticker`) and the WebSocket `ticker`
//! channel carry the same market under different field names:
//!
//! | Field     | REST     | WebSocket    |
//! |-----------|----------|--------------|
//! | bid       | `bid`    | `best_bid`   |
//! | ask       | `ask`    | `best_ask`   |
//! | last      | `price`  | `price`      |
//! | volume    | `volume` | `volume_24h` |
//! | last size | `size`   | `last_size`  |
//!
//! Both timestamp in RFC 3339 (`time`).

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{carry_extra, decimal_field, exchange_symbol, object, optional_decimal, quote_for};
use crate::domain::quote::{CurrencyPair, NormalizationError, Quote, RawMessage};

/// Public market data feed.
pub const WEBSOCKET_URL: &str = "wss://ws-feed.exchange.coinbase.com";

const REST_ENDPOINT: &str = "https://api.exchange.coinbase.com";

/// Coinbase product id for a pair (`BTC-EUR`).
#[must_use]
pub fn product_id(pair: &CurrencyPair) -> String {
    format!(
        "{}-{}",
        exchange_symbol(&pair.base),
        exchange_symbol(&pair.quote)
    )
}

/// REST ticker URL for a pair.
#[must_use]
pub fn ticker_url(pair: &CurrencyPair) -> String {
    format!("{REST_ENDPOINT}/products/{}/ticker", product_id(pair))
}

/// Normalize a Coinbase REST ticker or WebSocket message.
///
/// Feed messages other than `ticker` (subscriptions, heartbeats) yield
/// `Ok(None)`.
///
/// # Errors
///
/// - [`NormalizationError::ExchangeError`] for `{"message": ...}` bodies and
///   `error` feed messages
/// - [`NormalizationError::MissingField`] / [`NormalizationError::InvalidDecimal`]
///   / [`NormalizationError::InvalidTimestamp`] for malformed tickers
pub fn normalize(raw: &RawMessage) -> Result<Option<Quote>, NormalizationError> {
    let body = object(&raw.payload, "coinbase message")?;

    if let Some(kind) = body.get("type").and_then(Value::as_str) {
        return match kind {
            "ticker" => stream_ticker(raw, body).map(Some),
            "error" => Err(NormalizationError::ExchangeError(error_message(body))),
            _ => Ok(None),
        };
    }

    if body.contains_key("message") {
        return Err(NormalizationError::ExchangeError(error_message(body)));
    }

    rest_ticker(raw, body).map(Some)
}

fn rest_ticker(raw: &RawMessage, body: &Map<String, Value>) -> Result<Quote, NormalizationError> {
    if body.get("trade_id").is_none_or(Value::is_null) {
        return Err(NormalizationError::MissingField("trade_id".to_string()));
    }

    let observed_at = time(body)?;
    let bid_price = decimal_field(body, "bid")?;
    let ask_price = decimal_field(body, "ask")?;

    let mut quote = quote_for(raw, observed_at, bid_price, ask_price);
    quote.last_trade_price = optional_decimal(body, "price")?;
    quote.volume = optional_decimal(body, "volume")?;

    let mut extras = Map::new();
    carry_extra(&mut extras, "trade_id", body, "trade_id");
    carry_extra(&mut extras, "last_trade_volume", body, "size");
    quote.extras = extras;

    Ok(quote)
}

fn stream_ticker(raw: &RawMessage, body: &Map<String, Value>) -> Result<Quote, NormalizationError> {
    let observed_at = time(body)?;
    let bid_price = decimal_field(body, "best_bid")?;
    let ask_price = decimal_field(body, "best_ask")?;

    let mut quote = quote_for(raw, observed_at, bid_price, ask_price);
    quote.last_trade_price = optional_decimal(body, "price")?;
    quote.volume = optional_decimal(body, "volume_24h")?;

    let mut extras = Map::new();
    carry_extra(&mut extras, "trade_id", body, "trade_id");
    carry_extra(&mut extras, "last_trade_volume", body, "last_size");
    carry_extra(&mut extras, "low_24h", body, "low_24h");
    carry_extra(&mut extras, "high_24h", body, "high_24h");
    quote.extras = extras;

    Ok(quote)
}

fn time(body: &Map<String, Value>) -> Result<DateTime<Utc>, NormalizationError> {
    let text = body
        .get("time")
        .and_then(Value::as_str)
        .ok_or_else(|| NormalizationError::MissingField("time".to_string()))?;
    DateTime::parse_from_rfc3339(text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| NormalizationError::InvalidTimestamp(text.to_string()))
}

fn error_message(body: &Map<String, Value>) -> String {
    let message = body.get("message").and_then(Value::as_str).unwrap_or("unknown");
    match body.get("reason").and_then(Value::as_str) {
        Some(reason) => format!("{message}: {reason}"),
        None => message.to_string(),
    }
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
            exchange: Exchange::Coinbase,
            pair: CurrencyPair::new("XBT", "EUR"),
            requested_at: now,
            received_at: now,
            payload,
        }
    }

    fn expected_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2023-11-14T22:13:20.123456Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn urls_use_coinbase_symbols() {
        let pair = CurrencyPair::new("XBT", "EUR");
        assert_eq!(product_id(&pair), "BTC-EUR");
        assert_eq!(
            ticker_url(&pair),
            "https://api.exchange.coinbase.com/products/BTC-EUR/ticker"
        );
    }

    #[test]
    fn normalizes_rest_ticker() {
        let payload = json!({
            "trade_id": 4_729_088,
            "price": "35010.5",
            "size": "0.0105",
            "bid": "35008.1",
            "ask": "35012.3",
            "volume": "991.2",
            "time": "2023-11-14T22:13:20.123456Z"
        });
        let quote = normalize(&raw(payload)).unwrap().unwrap();

        assert_eq!(quote.exchange, Exchange::Coinbase);
        assert_eq!(quote.observed_at, expected_time());
        assert_eq!(quote.bid_price, Decimal::new(350_081, 1));
        assert_eq!(quote.ask_price, Decimal::new(350_123, 1));
        assert_eq!(quote.volume, Some(Decimal::new(9912, 1)));
        assert_eq!(quote.extras["trade_id"], json!(4_729_088));
        assert_eq!(quote.extras["last_trade_volume"], json!("0.0105"));
    }

    #[test]
    fn normalizes_stream_ticker() {
        let payload = json!({
            "type": "ticker",
            "product_id": "BTC-EUR",
            "trade_id": 4_729_089,
            "price": "35011.0",
            "best_bid": "35010.0",
            "best_ask": "35011.5",
            "volume_24h": "1002.7",
            "low_24h": "34500",
            "high_24h": "35500",
            "last_size": "0.2",
            "time": "2023-11-14T22:13:20.123456Z"
        });
        let quote = normalize(&raw(payload)).unwrap().unwrap();

        assert_eq!(quote.bid_price, Decimal::from(35_010));
        assert_eq!(quote.ask_price, Decimal::new(350_115, 1));
        assert_eq!(quote.volume, Some(Decimal::new(10_027, 1)));
        assert_eq!(quote.extras["low_24h"], json!("34500"));
        assert_eq!(quote.extras["last_trade_volume"], json!("0.2"));
    }

    #[test_case(json!({"type": "subscriptions", "channels": []}) ; "subscriptions")]
    #[test_case(json!({"type": "heartbeat", "sequence": 1}) ; "heartbeat")]
    fn control_messages_are_skipped(payload: Value) {
        assert_eq!(normalize(&raw(payload)), Ok(None));
    }

    #[test_case(json!({"message": "NotFound"}), "NotFound" ; "rest error")]
    #[test_case(
        json!({"type": "error", "message": "Failed to subscribe", "reason": "BTC-XYZ is not a valid product"}),
        "Failed to subscribe: BTC-XYZ is not a valid product" ;
        "feed error"
    )]
    fn error_bodies_are_reported(payload: Value, expected: &str) {
        assert_eq!(
            normalize(&raw(payload)),
            Err(NormalizationError::ExchangeError(expected.to_string()))
        );
    }

    #[test]
    fn rest_ticker_requires_trade_id() {
        let payload = json!({"bid": "1", "ask": "2", "time": "2023-11-14T22:13:20Z"});
        assert_eq!(
            normalize(&raw(payload)),
            Err(NormalizationError::MissingField("trade_id".to_string()))
        );
    }

    #[test]
    fn bad_time_is_reported() {
        let payload = json!({"trade_id": 1, "bid": "1", "ask": "2", "time": "now"});
        assert_eq!(
            normalize(&raw(payload)),
            Err(NormalizationError::InvalidTimestamp("now".to_string()))
        );
    }
}
