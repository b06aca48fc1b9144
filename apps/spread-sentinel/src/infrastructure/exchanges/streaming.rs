//! Coinbase WebSocket feed.
//!
//! Subscribes to the `ticker` and `heartbeat` channels for one product and
//! yields every text frame as a raw message. Control frames are handled in
//! place; a close frame or end of stream fails the source so the cohort
//! restarts with a fresh connection.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::coinbase;
use crate::application::ports::{ExchangeSource, SourceError, SourceFactory};
use crate::domain::quote::{CurrencyPair, Exchange, RawMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Channels subscribed on every connection.
const CHANNELS: [&str; 2] = ["ticker", "heartbeat"];

/// Floor for the keepalive period; a zero period cannot drive an interval.
const MIN_KEEPALIVE: Duration = Duration::from_millis(100);

/// Opens subscribed [`CoinbaseStream`]s.
#[derive(Debug, Clone)]
pub struct CoinbaseStreamFactory {
    url: String,
    pair: CurrencyPair,
    keepalive_interval: Duration,
}

impl CoinbaseStreamFactory {
    /// Create a factory for the feed at `url`.
    #[must_use]
    pub const fn new(url: String, pair: CurrencyPair, keepalive_interval: Duration) -> Self {
        Self {
            url,
            pair,
            keepalive_interval,
        }
    }

    fn subscribe_message(&self) -> Value {
        json!({
            "type": "subscribe",
            "product_ids": [coinbase::product_id(&self.pair)],
            "channels": CHANNELS,
        })
    }
}

#[async_trait]
impl SourceFactory for CoinbaseStreamFactory {
    fn exchange(&self) -> Exchange {
        Exchange::Coinbase
    }

    async fn open(&self) -> Result<Box<dyn ExchangeSource>, SourceError> {
        tracing::info!(url = %self.url, "Connecting to Coinbase feed");

        let (ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
            .await
            .map_err(transport)?;
        let (mut write, read) = ws.split();

        write
            .send(Message::Text(self.subscribe_message().to_string().into()))
            .await
            .map_err(transport)?;

        let period = self.keepalive_interval.max(MIN_KEEPALIVE);
        let mut keepalive = tokio::time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Ok(Box::new(CoinbaseStream {
            pair: self.pair.clone(),
            write,
            read,
            keepalive,
        }))
    }
}

/// A subscribed Coinbase feed connection.
pub struct CoinbaseStream {
    pair: CurrencyPair,
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    keepalive: Interval,
}

impl std::fmt::Debug for CoinbaseStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinbaseStream")
            .field("pair", &self.pair)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ExchangeSource for CoinbaseStream {
    async fn next(&mut self) -> Result<RawMessage, SourceError> {
        loop {
            tokio::select! {
                _ = self.keepalive.tick() => {
                    self.write
                        .send(Message::Ping(Vec::new().into()))
                        .await
                        .map_err(transport)?;
                }
                msg = self.read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            return Ok(self.raw_message(text.as_str()));
                        }
                        Some(Ok(Message::Binary(data))) => {
                            if let Ok(text) = std::str::from_utf8(&data) {
                                return Ok(self.raw_message(text));
                            }
                            tracing::warn!(len = data.len(), "Received non-UTF8 binary frame");
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.write.send(Message::Pong(data)).await.map_err(transport)?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!(?frame, "Coinbase sent close frame");
                            return Err(SourceError::ConnectionClosed);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(transport(e)),
                        None => return Err(SourceError::ConnectionClosed),
                    }
                }
            }
        }
    }
}

impl CoinbaseStream {
    fn raw_message(&self, text: &str) -> RawMessage {
        let now = Utc::now();
        RawMessage {
            exchange: Exchange::Coinbase,
            pair: self.pair.clone(),
            requested_at: now,
            received_at: now,
            payload: RawMessage::payload_from_text(text),
        }
    }
}

fn transport(e: tokio_tungstenite::tungstenite::Error) -> SourceError {
    SourceError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;

    /// Accept one connection, capture the subscribe frame, then replay
    /// `frames` and close.
    async fn feed(frames: Vec<Message>) -> (String, oneshot::Receiver<Value>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                let _ = tx.send(serde_json::from_str(text.as_str()).unwrap());
            }
            for frame in frames {
                ws.send(frame).await.unwrap();
            }
            let _ = ws.close(None).await;
        });

        (format!("ws://{addr}"), rx)
    }

    fn factory(url: String) -> CoinbaseStreamFactory {
        CoinbaseStreamFactory::new(
            url,
            CurrencyPair::new("XBT", "EUR"),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn subscribes_to_ticker_and_heartbeat() {
        let (url, subscribed) = feed(Vec::new()).await;
        let _source = factory(url).open().await.unwrap();

        let subscribe = subscribed.await.unwrap();
        assert_eq!(subscribe["type"], "subscribe");
        assert_eq!(subscribe["product_ids"], json!(["BTC-EUR"]));
        assert_eq!(subscribe["channels"], json!(["ticker", "heartbeat"]));
    }

    #[tokio::test]
    async fn yields_text_frames_then_fails_on_close() {
        let (url, _subscribed) = feed(vec![
            Message::Text(r#"{"type":"heartbeat"}"#.into()),
            Message::Ping(Vec::new().into()),
            Message::Text(r#"{"type":"ticker","price":"1"}"#.into()),
        ])
        .await;
        let mut source = factory(url).open().await.unwrap();

        let first = source.next().await.unwrap();
        assert_eq!(first.exchange, Exchange::Coinbase);
        assert_eq!(first.payload["type"], "heartbeat");

        let second = source.next().await.unwrap();
        assert_eq!(second.payload["type"], "ticker");

        assert_eq!(source.next().await.unwrap_err(), SourceError::ConnectionClosed);
    }

    #[tokio::test]
    async fn undecodable_frames_are_passed_on_as_text() {
        let (url, _subscribed) = feed(vec![
            Message::Text("".into()),
            Message::Text("not json".into()),
            Message::Text(r#"{"type":"ticker","price":"1"}"#.into()),
        ])
        .await;
        let mut source = factory(url).open().await.unwrap();

        let empty = source.next().await.unwrap();
        assert_eq!(empty.payload, Value::String(String::new()));
        let garbled = source.next().await.unwrap();
        assert_eq!(garbled.payload, Value::String("not json".to_string()));

        let ticker = source.next().await.unwrap();
        assert_eq!(ticker.payload["type"], "ticker");
    }

    #[tokio::test]
    async fn zero_keepalive_is_raised_to_the_floor() {
        let (url, _subscribed) = feed(vec![Message::Text(r#"{"type":"heartbeat"}"#.into())]).await;
        let factory = CoinbaseStreamFactory::new(url, CurrencyPair::new("XBT", "EUR"), Duration::ZERO);
        let mut source = factory.open().await.unwrap();

        assert_eq!(source.next().await.unwrap().payload["type"], "heartbeat");
    }

    #[tokio::test]
    async fn unreachable_feed_fails_to_open() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = factory(format!("ws://{addr}")).open().await.err().expect("open should fail");
        assert!(matches!(err, SourceError::Transport(_)));
    }
}
