//! Ingestion Supervision Integration Tests
//!
//! Drives the supervisor with scripted exchange sources, the production
//! normalizers and the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use spread_sentinel::application::ports::{
    ExchangeSource, QuoteNormalizer, QuoteSink, SourceError, SourceFactory,
};
use spread_sentinel::infrastructure::exchanges::ExchangeNormalizer;
use spread_sentinel::infrastructure::storage::InMemoryQuoteStore;
use spread_sentinel::{
    CurrencyPair, Exchange, IngestionSupervisor, RawMessage, SupervisorConfig, WorkerStatus,
};

type Script = Vec<Result<Value, SourceError>>;

struct ScriptedSource {
    exchange: Exchange,
    script: VecDeque<Result<Value, SourceError>>,
}

#[async_trait]
impl ExchangeSource for ScriptedSource {
    async fn next(&mut self) -> Result<RawMessage, SourceError> {
        match self.script.pop_front() {
            Some(Ok(payload)) => Ok(RawMessage {
                exchange: self.exchange,
                pair: CurrencyPair::new("XBT", "EUR"),
                requested_at: Utc::now(),
                received_at: Utc::now(),
                payload,
            }),
            Some(Err(e)) => Err(e),
            None => std::future::pending().await,
        }
    }
}

/// Plays one script per open; opens past the last script block forever.
struct ScriptedFactory {
    exchange: Exchange,
    scripts: Mutex<VecDeque<Script>>,
    opens: AtomicUsize,
}

impl ScriptedFactory {
    fn new(exchange: Exchange, scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            exchange,
            scripts: Mutex::new(scripts.into()),
            opens: AtomicUsize::new(0),
        })
    }

    fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFactory for ScriptedFactory {
    fn exchange(&self) -> Exchange {
        self.exchange
    }

    async fn open(&self) -> Result<Box<dyn ExchangeSource>, SourceError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.lock().pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedSource {
            exchange: self.exchange,
            script: script.into(),
        }))
    }
}

fn bitstamp_ticker(seq: i64) -> Value {
    json!({
        "timestamp": (1_700_000_000 + seq).to_string(),
        "bid": format!("{}", 35_000 + seq),
        "ask": format!("{}", 35_010 + seq),
        "last": "35005",
        "volume": "12.5"
    })
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn supervisor(
    factories: Vec<Arc<dyn SourceFactory>>,
    store: &Arc<InMemoryQuoteStore>,
) -> IngestionSupervisor {
    let normalizer: Arc<dyn QuoteNormalizer> = Arc::new(ExchangeNormalizer);
    IngestionSupervisor::new(
        factories,
        normalizer,
        Arc::clone(store) as Arc<dyn QuoteSink>,
        SupervisorConfig::default(),
    )
}

#[tokio::test]
async fn failing_source_restarts_whole_cohort_and_keeps_persisted_quotes() {
    let mut first_run: Script = (0..5).map(|seq| Ok(bitstamp_ticker(seq))).collect();
    first_run.push(Err(SourceError::ConnectionClosed));

    let failing = ScriptedFactory::new(Exchange::Bitstamp, vec![first_run]);
    let sibling = ScriptedFactory::new(Exchange::Kraken, Vec::new());
    let store = Arc::new(InMemoryQuoteStore::new());

    let supervisor = supervisor(
        vec![
            Arc::clone(&failing) as Arc<dyn SourceFactory>,
            Arc::clone(&sibling) as Arc<dyn SourceFactory>,
        ],
        &store,
    );
    let states = supervisor.states();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(supervisor.run(cancel.clone()));

    wait_for(|| failing.opens() == 2 && sibling.opens() == 2 && states.all_running()).await;
    cancel.cancel();
    handle.await.unwrap();

    let snapshot = states.snapshot();
    assert_eq!(snapshot.len(), 2);
    for worker in &snapshot {
        assert_eq!(worker.restart_count, 1, "{:?}", worker.exchange);
        assert_eq!(worker.status, WorkerStatus::Running);
    }

    let quotes = store.quotes();
    assert_eq!(quotes.len(), 5);
    let bids: Vec<Decimal> = quotes.iter().map(|q| q.bid_price).collect();
    assert_eq!(
        bids,
        (0..5).map(|seq| Decimal::from(35_000 + seq)).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn rejected_messages_are_dropped_without_restart() {
    let script: Script = vec![
        Ok(bitstamp_ticker(0)),
        Ok(json!({"bid": "1", "ask": "2"})),
        Ok(json!({"timestamp": "1700000002", "bid": "n/a", "ask": "2"})),
        Ok(bitstamp_ticker(3)),
    ];
    let factory = ScriptedFactory::new(Exchange::Bitstamp, vec![script]);
    let store = Arc::new(InMemoryQuoteStore::new());

    let supervisor = supervisor(vec![Arc::clone(&factory) as Arc<dyn SourceFactory>], &store);
    let states = supervisor.states();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(supervisor.run(cancel.clone()));

    wait_for(|| store.len() == 2).await;
    cancel.cancel();
    handle.await.unwrap();

    let observed: Vec<i64> = store
        .quotes()
        .iter()
        .map(|q| q.observed_at.timestamp())
        .collect();
    assert_eq!(observed, vec![1_700_000_000, 1_700_000_003]);
    assert_eq!(factory.opens(), 1);
    assert_eq!(states.snapshot()[0].restart_count, 0);
}

#[tokio::test]
async fn storage_failure_drops_quote_and_keeps_worker_running() {
    let script: Script = vec![Ok(bitstamp_ticker(0)), Ok(bitstamp_ticker(1))];
    let factory = ScriptedFactory::new(Exchange::Bitstamp, vec![script]);
    let store = Arc::new(InMemoryQuoteStore::new());
    store.set_failing(true);

    let supervisor = supervisor(vec![Arc::clone(&factory) as Arc<dyn SourceFactory>], &store);
    let states = supervisor.states();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(supervisor.run(cancel.clone()));

    // Give the worker time to drain its script against the failing store.
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    handle.await.unwrap();

    assert!(store.is_empty());
    assert_eq!(factory.opens(), 1);
    assert_eq!(states.snapshot()[0].restart_count, 0);
}

#[tokio::test]
async fn undecodable_text_is_dropped_without_restart() {
    let script: Script = vec![
        Ok(RawMessage::payload_from_text("")),
        Ok(bitstamp_ticker(1)),
        Ok(RawMessage::payload_from_text("<html>502 Bad Gateway</html>")),
        Ok(bitstamp_ticker(3)),
    ];
    let factory = ScriptedFactory::new(Exchange::Bitstamp, vec![script]);
    let sibling = ScriptedFactory::new(Exchange::Kraken, Vec::new());
    let store = Arc::new(InMemoryQuoteStore::new());

    let supervisor = supervisor(
        vec![
            Arc::clone(&factory) as Arc<dyn SourceFactory>,
            Arc::clone(&sibling) as Arc<dyn SourceFactory>,
        ],
        &store,
    );
    let states = supervisor.states();
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(supervisor.run(cancel.clone()));

    wait_for(|| store.len() == 2).await;
    cancel.cancel();
    handle.await.unwrap();

    let observed: Vec<i64> = store
        .quotes()
        .iter()
        .map(|q| q.observed_at.timestamp())
        .collect();
    assert_eq!(observed, vec![1_700_000_001, 1_700_000_003]);
    assert_eq!(factory.opens(), 1);
    assert_eq!(sibling.opens(), 1);
    for worker in states.snapshot() {
        assert_eq!(worker.restart_count, 0, "{:?}", worker.exchange);
    }
}
