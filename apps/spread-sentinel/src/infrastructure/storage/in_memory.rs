//! In-memory quote store.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Timelike, Utc};
use parking_lot::RwLock;

use crate::application::ports::{QuoteSink, SpreadRepository, StorageError};
use crate::domain::quote::Quote;
use crate::domain::spread::{Spread, SpreadQuery};

/// In-memory implementation of `QuoteSink` and `SpreadRepository`.
///
/// Suitable for testing and development. Not for production use.
///
/// Active hours are evaluated in UTC; there is no time zone database here.
#[derive(Debug, Default)]
pub struct InMemoryQuoteStore {
    quotes: RwLock<Vec<Quote>>,
    now: RwLock<Option<DateTime<Utc>>>,
    failing: AtomicBool,
}

impl InMemoryQuoteStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored quotes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }

    /// Stored quotes in append order.
    #[must_use]
    pub fn quotes(&self) -> Vec<Quote> {
        self.quotes.read().clone()
    }

    /// Pin the clock used for the lookback and active hours; `None` follows
    /// the wall clock.
    pub fn set_now(&self, now: Option<DateTime<Utc>>) {
        *self.now.write() = now;
    }

    /// Make every operation fail with a connection error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(StorageError::Connection("store unavailable".to_string()));
        }
        Ok(())
    }

    fn now(&self) -> DateTime<Utc> {
        (*self.now.read()).unwrap_or_else(Utc::now)
    }

    /// Latest quote per exchange observed after `since`.
    fn latest_since(&self, since: DateTime<Utc>) -> Vec<Quote> {
        let quotes = self.quotes.read();
        let mut latest: Vec<Quote> = Vec::new();
        for quote in quotes.iter().filter(|q| q.observed_at > since) {
            match latest.iter_mut().find(|l| l.exchange == quote.exchange) {
                Some(existing) if existing.observed_at <= quote.observed_at => {
                    *existing = quote.clone();
                }
                Some(_) => {}
                None => latest.push(quote.clone()),
            }
        }
        latest
    }
}

#[async_trait]
impl QuoteSink for InMemoryQuoteStore {
    async fn append(&self, quote: &Quote) -> Result<(), StorageError> {
        self.check()?;
        self.quotes.write().push(quote.clone());
        Ok(())
    }
}

#[async_trait]
impl SpreadRepository for InMemoryQuoteStore {
    async fn query_spreads(&self, query: &SpreadQuery) -> Result<Vec<Spread>, StorageError> {
        self.check()?;

        let now = self.now();
        let lookback = TimeDelta::from_std(query.lookback).unwrap_or(TimeDelta::MAX);
        let since = now.checked_sub_signed(lookback).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let max_skew = TimeDelta::from_std(query.max_leg_skew).unwrap_or(TimeDelta::MAX);
        let hour = now.hour();

        let latest = self.latest_since(since);
        let mut spreads: Vec<Spread> = latest
            .iter()
            .flat_map(|sell| latest.iter().map(move |buy| (sell, buy)))
            .filter(|(sell, buy)| sell.exchange != buy.exchange)
            .filter_map(|(sell, buy)| {
                Spread::from_sides(
                    sell.exchange,
                    sell.bid_price,
                    sell.observed_at,
                    buy.exchange,
                    buy.ask_price,
                    buy.observed_at,
                )
            })
            .filter(|s| query.clears_costs(s.sell_price, s.buy_price))
            .filter(|s| (s.sell_to_ts - s.buy_from_ts).abs() <= max_skew)
            .filter(|s| query.is_profitable(s.spread_pct, hour))
            .collect();

        spreads.sort_by(|a, b| {
            b.spread_pct
                .cmp(&a.spread_pct)
                .then_with(|| a.sell_to_exchange.as_str().cmp(b.sell_to_exchange.as_str()))
                .then_with(|| a.buy_from_exchange.as_str().cmp(b.buy_from_exchange.as_str()))
        });

        Ok(spreads)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::Map;

    use super::*;
    use crate::domain::quote::Exchange;

    fn at(hour: u32, secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_700_000_000 - 1_700_000_000 % 86_400, 0).unwrap()
            + TimeDelta::hours(i64::from(hour))
            + TimeDelta::seconds(secs)
    }

    fn quote(exchange: Exchange, observed_at: DateTime<Utc>, bid: i64, ask: i64) -> Quote {
        Quote {
            observed_at,
            exchange,
            base: "XBT".to_string(),
            quote_currency: "EUR".to_string(),
            bid_price: Decimal::from(bid),
            ask_price: Decimal::from(ask),
            last_trade_price: None,
            volume: None,
            extras: Map::new(),
        }
    }

    async fn store_at(now: DateTime<Utc>, quotes: &[Quote]) -> InMemoryQuoteStore {
        let store = InMemoryQuoteStore::new();
        store.set_now(Some(now));
        for q in quotes {
            store.append(q).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn finds_profitable_spread_during_active_hours() {
        let now = at(12, 0);
        let store = store_at(
            now,
            &[
                quote(Exchange::Kraken, now - TimeDelta::seconds(2), 10_300, 10_310),
                quote(Exchange::Bitstamp, now - TimeDelta::seconds(1), 10_090, 10_100),
            ],
        )
        .await;

        let spreads = store.query_spreads(&SpreadQuery::default()).await.unwrap();

        assert_eq!(spreads.len(), 1);
        let spread = &spreads[0];
        assert_eq!(spread.sell_to_exchange, Exchange::Kraken);
        assert_eq!(spread.buy_from_exchange, Exchange::Bitstamp);
        assert_eq!(spread.spread_amount, Decimal::from(200));
        assert_eq!(spread.spread_pct, Decimal::new(198, 2));
    }

    #[tokio::test]
    async fn off_hours_need_the_higher_threshold() {
        let now = at(3, 0);
        let store = store_at(
            now,
            &[
                quote(Exchange::Kraken, now, 10_300, 10_310),
                quote(Exchange::Bitstamp, now, 10_090, 10_100),
            ],
        )
        .await;

        assert!(store.query_spreads(&SpreadQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn only_latest_quote_per_exchange_counts() {
        let now = at(12, 0);
        let store = store_at(
            now,
            &[
                quote(Exchange::Kraken, now - TimeDelta::seconds(3), 10_300, 10_310),
                quote(Exchange::Kraken, now - TimeDelta::seconds(1), 10_100, 10_110),
                quote(Exchange::Bitstamp, now, 10_090, 10_100),
            ],
        )
        .await;

        assert!(store.query_spreads(&SpreadQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_and_misaligned_legs_are_ignored() {
        let now = at(12, 0);
        let stale = store_at(
            now,
            &[
                quote(Exchange::Kraken, now - TimeDelta::minutes(11), 10_300, 10_310),
                quote(Exchange::Bitstamp, now, 10_090, 10_100),
            ],
        )
        .await;
        assert!(stale.query_spreads(&SpreadQuery::default()).await.unwrap().is_empty());

        let skewed = store_at(
            now,
            &[
                quote(Exchange::Kraken, now - TimeDelta::seconds(6), 10_300, 10_310),
                quote(Exchange::Bitstamp, now, 10_090, 10_100),
            ],
        )
        .await;
        assert!(skewed.query_spreads(&SpreadQuery::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn results_are_ordered_by_pct_descending() {
        let now = at(12, 0);
        let store = store_at(
            now,
            &[
                quote(Exchange::Kraken, now, 10_400, 10_410),
                quote(Exchange::Coinbase, now, 10_300, 10_310),
                quote(Exchange::Bitstamp, now, 10_090, 10_100),
            ],
        )
        .await;

        let spreads = store.query_spreads(&SpreadQuery::default()).await.unwrap();
        let pcts: Vec<Decimal> = spreads.iter().map(|s| s.spread_pct).collect();
        assert_eq!(spreads.len(), 2);
        assert!(pcts.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(spreads[0].sell_to_exchange, Exchange::Kraken);
    }

    #[tokio::test]
    async fn failing_store_rejects_operations() {
        let store = InMemoryQuoteStore::new();
        store.set_failing(true);
        let q = quote(Exchange::Kraken, Utc::now(), 1, 2);
        assert!(matches!(
            store.append(&q).await,
            Err(StorageError::Connection(_))
        ));
        assert!(store.is_empty());
    }
}
