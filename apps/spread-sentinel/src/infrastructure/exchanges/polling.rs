//! REST polling source.
//!
//! One GET per tick against a ticker endpoint. The first request goes out
//! immediately; every later one waits out the poll interval first.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::application::ports::{ExchangeSource, SourceError, SourceFactory};
use crate::domain::quote::{CurrencyPair, Exchange, RawMessage};

/// Opens [`PollingSource`]s sharing one HTTP client.
#[derive(Debug, Clone)]
pub struct PollingSourceFactory {
    exchange: Exchange,
    url: String,
    pair: CurrencyPair,
    interval: Duration,
    client: reqwest::Client,
}

impl PollingSourceFactory {
    /// Create a factory polling `url` every `interval`.
    #[must_use]
    pub const fn new(
        exchange: Exchange,
        url: String,
        pair: CurrencyPair,
        interval: Duration,
        client: reqwest::Client,
    ) -> Self {
        Self {
            exchange,
            url,
            pair,
            interval,
            client,
        }
    }

    /// Endpoint being polled.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SourceFactory for PollingSourceFactory {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn open(&self) -> Result<Box<dyn ExchangeSource>, SourceError> {
        tracing::debug!(exchange = %self.exchange, url = %self.url, "Opening polling source");
        Ok(Box::new(PollingSource {
            exchange: self.exchange,
            url: self.url.clone(),
            pair: self.pair.clone(),
            interval: self.interval,
            client: self.client.clone(),
            polled: false,
        }))
    }
}

/// A polling connection to one ticker endpoint.
#[derive(Debug)]
pub struct PollingSource {
    exchange: Exchange,
    url: String,
    pair: CurrencyPair,
    interval: Duration,
    client: reqwest::Client,
    polled: bool,
}

#[async_trait]
impl ExchangeSource for PollingSource {
    async fn next(&mut self) -> Result<RawMessage, SourceError> {
        if self.polled {
            tokio::time::sleep(self.interval).await;
        }
        self.polled = true;

        let requested_at = Utc::now();
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Http(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Transport(e.to_string()))?;
        let received_at = Utc::now();

        Ok(RawMessage {
            exchange: self.exchange,
            pair: self.pair.clone(),
            requested_at,
            received_at,
            payload: RawMessage::payload_from_text(&body),
        })
    }
}
