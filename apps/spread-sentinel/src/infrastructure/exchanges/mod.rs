//! Exchange Adapters
//!
//! Sources that pull raw ticker messages from each exchange and the pure
//! normalizers that map them to canonical [`Quote`]s.
//!
//! | Exchange | Transport | Timestamp |
//! |----------|-----------|-----------|
//! | Kraken   | REST poll | none, request/response midpoint |
//! | Bitstamp | REST poll | unix seconds `timestamp` |
//! | Coinbase | REST poll or WebSocket `ticker` | RFC 3339 `time` |

use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::application::ports::{QuoteNormalizer, SourceError, SourceFactory};
use crate::domain::quote::{Exchange, NormalizationError, Quote, RawMessage};
use crate::infrastructure::config::IngestionSettings;

pub mod bitstamp;
pub mod coinbase;
pub mod kraken;
pub mod polling;
pub mod streaming;

pub use polling::{PollingSource, PollingSourceFactory};
pub use streaming::{CoinbaseStream, CoinbaseStreamFactory};

// =============================================================================
// Normalizer
// =============================================================================

/// Dispatches each raw message to its exchange's normalizer.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExchangeNormalizer;

impl QuoteNormalizer for ExchangeNormalizer {
    fn normalize(&self, raw: &RawMessage) -> Result<Option<Quote>, NormalizationError> {
        match raw.exchange {
            Exchange::Kraken => kraken::normalize(raw).map(Some),
            Exchange::Bitstamp => bitstamp::normalize(raw).map(Some),
            Exchange::Coinbase => coinbase::normalize(raw),
        }
    }
}

// =============================================================================
// Source Factories
// =============================================================================

/// Build one source factory per configured exchange, in configuration order.
///
/// # Errors
///
/// Returns [`SourceError::Transport`] if the HTTP client cannot be built.
pub fn build_source_factories(
    settings: &IngestionSettings,
) -> Result<Vec<Arc<dyn SourceFactory>>, SourceError> {
    let client = reqwest::Client::builder()
        .timeout(settings.http_timeout)
        .user_agent(concat!("spread-sentinel/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SourceError::Transport(e.to_string()))?;

    let factories = settings
        .exchanges
        .iter()
        .map(|exchange| -> Arc<dyn SourceFactory> {
            match exchange {
                Exchange::Kraken => Arc::new(PollingSourceFactory::new(
                    Exchange::Kraken,
                    kraken::ticker_url(&settings.pair),
                    settings.pair.clone(),
                    settings.poll_interval,
                    client.clone(),
                )),
                Exchange::Bitstamp => Arc::new(PollingSourceFactory::new(
                    Exchange::Bitstamp,
                    bitstamp::ticker_url(&settings.pair),
                    settings.pair.clone(),
                    settings.poll_interval,
                    client.clone(),
                )),
                Exchange::Coinbase if settings.coinbase_streaming => {
                    Arc::new(CoinbaseStreamFactory::new(
                        coinbase::WEBSOCKET_URL.to_string(),
                        settings.pair.clone(),
                        settings.keepalive_interval,
                    ))
                }
                Exchange::Coinbase => Arc::new(PollingSourceFactory::new(
                    Exchange::Coinbase,
                    coinbase::ticker_url(&settings.pair),
                    settings.pair.clone(),
                    settings.poll_interval,
                    client.clone(),
                )),
            }
        })
        .collect();

    Ok(factories)
}

/// Exchange-side spelling of a currency (`XBT` is `BTC` outside Kraken).
pub(crate) fn exchange_symbol(symbol: &str) -> &str {
    if symbol == "XBT" { "BTC" } else { symbol }
}

// =============================================================================
// Field Helpers
// =============================================================================

pub(crate) fn object<'a>(
    value: &'a Value,
    context: &str,
) -> Result<&'a Map<String, Value>, NormalizationError> {
    value
        .as_object()
        .ok_or_else(|| NormalizationError::UnexpectedShape(format!("{context} is not an object")))
}

/// Parse a decimal carried as a JSON string or number.
pub(crate) fn decimal_value(value: &Value, field: &str) -> Result<Decimal, NormalizationError> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(NormalizationError::InvalidDecimal {
                field: field.to_string(),
                value: other.to_string(),
            });
        }
    };
    text.trim()
        .parse::<Decimal>()
        .or_else(|_| Decimal::from_scientific(text.trim()))
        .map_err(|_| NormalizationError::InvalidDecimal {
            field: field.to_string(),
            value: text,
        })
}

/// Required decimal field.
pub(crate) fn decimal_field(
    obj: &Map<String, Value>,
    field: &str,
) -> Result<Decimal, NormalizationError> {
    let value = obj
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| NormalizationError::MissingField(field.to_string()))?;
    decimal_value(value, field)
}

/// Optional decimal field; present but unparsable is still an error.
pub(crate) fn optional_decimal(
    obj: &Map<String, Value>,
    field: &str,
) -> Result<Option<Decimal>, NormalizationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => decimal_value(value, field).map(Some),
    }
}

/// Copy `source_field` into `extras` under `name`, if present.
pub(crate) fn carry_extra(
    extras: &mut Map<String, Value>,
    name: &str,
    obj: &Map<String, Value>,
    source_field: &str,
) {
    if let Some(value) = obj.get(source_field).filter(|v| !v.is_null()) {
        extras.insert(name.to_string(), value.clone());
    }
}

/// Quote skeleton shared by every normalizer.
pub(crate) fn quote_for(
    raw: &RawMessage,
    observed_at: chrono::DateTime<chrono::Utc>,
    bid_price: Decimal,
    ask_price: Decimal,
) -> Quote {
    Quote {
        observed_at,
        exchange: raw.exchange,
        base: raw.pair.base.clone(),
        quote_currency: raw.pair.quote.clone(),
        bid_price,
        ask_price,
        last_trade_price: None,
        volume: None,
        extras: Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    use super::*;
    use crate::domain::quote::CurrencyPair;

    #[derive(Debug, Clone, Copy)]
    enum Entry {
        Valid,
        MissingTimestamp,
        BadBid,
        NotJson,
        Empty,
    }

    fn entry_strategy() -> impl Strategy<Value = Entry> {
        prop_oneof![
            3 => Just(Entry::Valid),
            1 => Just(Entry::MissingTimestamp),
            1 => Just(Entry::BadBid),
            1 => Just(Entry::NotJson),
            1 => Just(Entry::Empty),
        ]
    }

    /// Bitstamp message for position `seq`; valid ones carry `seq` in their
    /// timestamp so survivors can be traced back.
    fn bitstamp_message(seq: usize, entry: Entry) -> RawMessage {
        let timestamp = (1_700_000_000 + seq).to_string();
        let payload = match entry {
            Entry::Valid => json!({"timestamp": timestamp, "bid": "35000", "ask": "35010"}),
            Entry::MissingTimestamp => json!({"bid": "35000", "ask": "35010"}),
            Entry::BadBid => json!({"timestamp": timestamp, "bid": "n/a", "ask": "35010"}),
            Entry::NotJson => RawMessage::payload_from_text("<html>Bad Gateway</html>"),
            Entry::Empty => RawMessage::payload_from_text(""),
        };
        RawMessage {
            exchange: Exchange::Bitstamp,
            pair: CurrencyPair::new("XBT", "EUR"),
            requested_at: Utc::now(),
            received_at: Utc::now(),
            payload,
        }
    }

    proptest! {
        #[test]
        fn only_malformed_entries_are_dropped(
            entries in prop::collection::vec(entry_strategy(), 1..40)
                .prop_filter("needs a malformed entry", |v| {
                    v.iter().any(|e| !matches!(e, Entry::Valid))
                })
        ) {
            let normalizer = ExchangeNormalizer;
            let survivors: Vec<i64> = entries
                .iter()
                .enumerate()
                .filter_map(|(seq, entry)| {
                    normalizer.normalize(&bitstamp_message(seq, *entry)).ok().flatten()
                })
                .map(|quote| quote.observed_at.timestamp() - 1_700_000_000)
                .collect();

            let expected: Vec<i64> = entries
                .iter()
                .enumerate()
                .filter(|(_, entry)| matches!(entry, Entry::Valid))
                .map(|(seq, _)| i64::try_from(seq).unwrap())
                .collect();
            prop_assert_eq!(survivors, expected);
        }
    }

    #[test_case(json!("10.5"), Decimal::new(105, 1) ; "string")]
    #[test_case(json!(7), Decimal::from(7) ; "integer")]
    #[test_case(json!(0.25), Decimal::new(25, 2) ; "float")]
    #[test_case(json!("1e-3"), Decimal::new(1, 3) ; "scientific string")]
    fn decimal_value_accepts(value: Value, expected: Decimal) {
        assert_eq!(decimal_value(&value, "f").unwrap(), expected);
    }

    #[test_case(json!("abc") ; "text")]
    #[test_case(json!(true) ; "bool")]
    #[test_case(json!([1]) ; "array")]
    fn decimal_value_rejects(value: Value) {
        assert!(matches!(
            decimal_value(&value, "f"),
            Err(NormalizationError::InvalidDecimal { .. })
        ));
    }

    #[test]
    fn null_required_field_is_missing() {
        let obj = json!({"bid": null});
        assert_eq!(
            decimal_field(obj.as_object().unwrap(), "bid"),
            Err(NormalizationError::MissingField("bid".to_string()))
        );
    }

    #[test]
    fn exchange_symbol_maps_xbt() {
        assert_eq!(exchange_symbol("XBT"), "BTC");
        assert_eq!(exchange_symbol("EUR"), "EUR");
    }

    #[test]
    fn factories_follow_configuration_order() {
        let settings = IngestionSettings {
            exchanges: vec![Exchange::Coinbase, Exchange::Kraken],
            ..IngestionSettings::default()
        };
        let factories = build_source_factories(&settings).unwrap();
        let exchanges: Vec<Exchange> = factories.iter().map(|f| f.exchange()).collect();
        assert_eq!(exchanges, vec![Exchange::Coinbase, Exchange::Kraken]);
    }
}
