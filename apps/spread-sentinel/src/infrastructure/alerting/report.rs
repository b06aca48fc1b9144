//! Plain-text report rendering.
//!
//! One block per spread, `field: value` per line, blocks separated by a
//! blank line. Spreads appear in key order.

use std::fmt::Write as _;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::domain::spread::Spread;
use crate::domain::tracking::AlertBatch;

/// Report subject for a batch sent at `now`.
#[must_use]
pub fn render_subject(now: DateTime<Utc>) -> String {
    format!(
        "Spread report {}",
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

/// Report body for a batch.
#[must_use]
pub fn render_body(batch: &AlertBatch) -> String {
    batch
        .values()
        .map(render_spread)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_spread(spread: &Spread) -> String {
    let mut block = String::new();
    let fields: [(&str, String); 9] = [
        ("key", spread.key.to_string()),
        ("sell_to_exchange", spread.sell_to_exchange.to_string()),
        ("buy_from_exchange", spread.buy_from_exchange.to_string()),
        ("spread_amount", spread.spread_amount.to_string()),
        ("spread_pct", spread.spread_pct.to_string()),
        ("sell_price", spread.sell_price.to_string()),
        ("buy_price", spread.buy_price.to_string()),
        ("sell_to_ts", spread.sell_to_ts.to_rfc3339()),
        ("buy_from_ts", spread.buy_from_ts.to_rfc3339()),
    ];
    for (name, value) in fields {
        let _ = writeln!(block, "{name}: {value}");
    }
    block
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::quote::Exchange;

    fn spread(sell: Exchange, buy: Exchange) -> Spread {
        let ts = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        Spread::from_sides(sell, Decimal::from(10_300), ts, buy, Decimal::from(10_100), ts).unwrap()
    }

    #[test]
    fn subject_carries_timestamp() {
        let now = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        assert_eq!(render_subject(now), "Spread report 2023-11-14T22:13:20Z");
    }

    #[test]
    fn body_lists_fields_in_fixed_order() {
        let s = spread(Exchange::Kraken, Exchange::Bitstamp);
        let batch = AlertBatch::from([(s.key.clone(), s.clone())]);

        let body = render_body(&batch);
        let names: Vec<&str> = body
            .lines()
            .filter_map(|line| line.split_once(": ").map(|(name, _)| name))
            .collect();

        assert_eq!(
            names,
            [
                "key",
                "sell_to_exchange",
                "buy_from_exchange",
                "spread_amount",
                "spread_pct",
                "sell_price",
                "buy_price",
                "sell_to_ts",
                "buy_from_ts",
            ]
        );
        assert!(body.contains("sell_to_exchange: kraken\n"));
        assert!(body.contains("spread_pct: 1.98\n"));
    }

    #[test]
    fn blocks_are_separated_by_blank_line() {
        let a = spread(Exchange::Kraken, Exchange::Bitstamp);
        let b = spread(Exchange::Coinbase, Exchange::Bitstamp);
        let batch = AlertBatch::from([(a.key.clone(), a), (b.key.clone(), b)]);

        let body = render_body(&batch);
        assert_eq!(body.matches("\n\n").count(), 1);
        assert_eq!(body.matches("key: ").count(), 2);
    }
}
