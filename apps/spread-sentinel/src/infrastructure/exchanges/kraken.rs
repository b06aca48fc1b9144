//! Kraken public ticker.
//!
//! `GET /0/public/Ticker?pair=XBTEUR` answers with
//! `{"error": [], "result": {"XXBTZEUR": {...}}}` where every field is an
//! array of strings (`a` ask, `b` bid, `c` last trade, `v` volume, ...).
//! The ticker carries no timestamp.

use serde_json::{Map, Value};

use super::{decimal_value, object, quote_for};
use crate::domain::quote::{CurrencyPair, NormalizationError, Quote, RawMessage};

const TICKER_ENDPOINT: &str = "https://api.kraken.com/0/public/Ticker";

/// Ticker URL for a pair.
#[must_use]
pub fn ticker_url(pair: &CurrencyPair) -> String {
    format!("{TICKER_ENDPOINT}?pair={}{}", pair.base, pair.quote)
}

/// Extras copied from the ticker: `(name, field, index)`.
const EXTRAS: &[(&str, &str, usize)] = &[
    ("last_trade_volume", "c", 1),
    ("ask_whole_lot_volume", "a", 1),
    ("ask_volume", "a", 2),
    ("bid_whole_lot_volume", "b", 1),
    ("bid_volume", "b", 2),
    ("volume_today", "v", 0),
    ("vwap_today", "p", 0),
    ("vwap_24h", "p", 1),
    ("trades_today", "t", 0),
    ("trades_24h", "t", 1),
    ("low_today", "l", 0),
    ("low_24h", "l", 1),
    ("high_today", "h", 0),
    ("high_24h", "h", 1),
];

/// Normalize a Kraken ticker response.
///
/// # Errors
///
/// - [`NormalizationError::ExchangeError`] if the `error` array is non-empty
/// - [`NormalizationError::UnexpectedShape`] if `result` is not a single ticker
/// - [`NormalizationError::MissingField`] / [`NormalizationError::InvalidDecimal`]
///   for absent or malformed prices
pub fn normalize(raw: &RawMessage) -> Result<Quote, NormalizationError> {
    let body = object(&raw.payload, "kraken response")?;

    if let Some(errors) = body.get("error").and_then(Value::as_array)
        && !errors.is_empty()
    {
        let joined = errors
            .iter()
            .map(|e| e.as_str().map_or_else(|| e.to_string(), str::to_string))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(NormalizationError::ExchangeError(joined));
    }

    let result = body
        .get("result")
        .ok_or_else(|| NormalizationError::MissingField("result".to_string()))?;
    let result = object(result, "kraken result")?;

    let mut tickers = result.values();
    let ticker = match (tickers.next(), tickers.next()) {
        (Some(ticker), None) => object(ticker, "kraken ticker")?,
        (None, _) => {
            return Err(NormalizationError::UnexpectedShape(
                "kraken result is empty".to_string(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(NormalizationError::UnexpectedShape(format!(
                "kraken result holds {} tickers",
                result.len()
            )));
        }
    };

    let ask_price = required(ticker, "a", 0)?;
    let bid_price = required(ticker, "b", 0)?;

    let mut quote = quote_for(raw, raw.round_trip_midpoint(), bid_price, ask_price);
    quote.last_trade_price = element(ticker, "c", 0)
        .map(|v| decimal_value(v, "c"))
        .transpose()?;
    quote.volume = element(ticker, "v", 1)
        .map(|v| decimal_value(v, "v"))
        .transpose()?;

    let mut extras = Map::new();
    for (name, field, index) in EXTRAS {
        if let Some(value) = element(ticker, field, *index) {
            extras.insert((*name).to_string(), value.clone());
        }
    }
    if let Some(opening) = ticker.get("o").filter(|v| !v.is_null()) {
        extras.insert("opening".to_string(), opening.clone());
    }
    quote.extras = extras;

    Ok(quote)
}

fn element<'a>(ticker: &'a Map<String, Value>, field: &str, index: usize) -> Option<&'a Value> {
    ticker
        .get(field)
        .and_then(Value::as_array)
        .and_then(|values| values.get(index))
        .filter(|v| !v.is_null())
}

fn required(
    ticker: &Map<String, Value>,
    field: &str,
    index: usize,
) -> Result<rust_decimal::Decimal, NormalizationError> {
    let value = element(ticker, field, index)
        .ok_or_else(|| NormalizationError::MissingField(format!("{field}[{index}]")))?;
    decimal_value(value, field)
}
