#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use search_provider::backend::{ChangeEvent, ChangeStream, Database, ListBackend, RecordCursor};
use search_provider::errors::BackendError;
use search_provider::query::{QueryPlan, parse, translate};
use search_provider::session::{SessionContext, SessionEvent};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn plan(name: &str) -> QueryPlan {
    translate(&parse(name).unwrap(), "ds_id")
}

/// Polls `check` until it holds; panics after [`TIMEOUT`].
pub async fn wait_until(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn context(
    database: Arc<dyn Database>,
    lists: Arc<dyn ListBackend>,
) -> (SessionContext, mpsc::UnboundedReceiver<SessionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = SessionContext { database, lists, primary_key: "ds_id".into(), events: tx };
    (ctx, rx)
}

pub fn key(id: &str) -> Value {
    json!({ "ds_id": id })
}

/// Five books; only `don` is Spanish and `lor` is the most recent.
pub fn books() -> Vec<Value> {
    vec![
        json!({"ds_id": "don", "title": "Don Quixote", "language": "Spanish", "released": 1605}),
        json!({"ds_id": "lor", "title": "The Lord of the Rings", "language": "English", "released": 1954}),
        json!({"ds_id": "hob", "title": "The Hobbit", "language": "English", "released": 1937}),
        json!({"ds_id": "tal", "title": "A Tale of Two Cities", "language": "English", "released": 1859}),
        json!({"ds_id": "lpp", "title": "Le Petit Prince", "language": "French", "released": 1943}),
    ]
}

type FeedItem = Result<ChangeEvent, BackendError>;

/// A database whose snapshot and changefeed are scripted by the test.
pub struct ScriptedDatabase {
    snapshot: Mutex<Vec<Result<Value, BackendError>>>,
    query_error: Mutex<Option<BackendError>>,
    subscribe_error: Mutex<Option<BackendError>>,
    feed_tx: Mutex<Option<mpsc::UnboundedSender<FeedItem>>>,
    feed_rx: Mutex<Option<mpsc::UnboundedReceiver<FeedItem>>>,
}

impl ScriptedDatabase {
    pub fn new(snapshot: Vec<Value>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            snapshot: Mutex::new(snapshot.into_iter().map(Ok).collect()),
            query_error: Mutex::new(None),
            subscribe_error: Mutex::new(None),
            feed_tx: Mutex::new(Some(tx)),
            feed_rx: Mutex::new(Some(rx)),
        })
    }

    pub fn fail_query(&self, e: BackendError) {
        *self.query_error.lock() = Some(e);
    }

    pub fn fail_subscribe(&self, e: BackendError) {
        *self.subscribe_error.lock() = Some(e);
    }

    /// Appends an error after the snapshot records.
    pub fn break_snapshot(&self, e: BackendError) {
        self.snapshot.lock().push(Err(e));
    }

    pub fn push(&self, event: ChangeEvent) {
        if let Some(tx) = self.feed_tx.lock().as_ref() {
            let _ = tx.send(Ok(event));
        }
    }

    pub fn push_error(&self, e: BackendError) {
        if let Some(tx) = self.feed_tx.lock().as_ref() {
            let _ = tx.send(Err(e));
        }
    }

    pub fn end_feed(&self) {
        self.feed_tx.lock().take();
    }
}

#[async_trait]
impl Database for ScriptedDatabase {
    async fn query(&self, _plan: &QueryPlan) -> Result<RecordCursor, BackendError> {
        if let Some(e) = self.query_error.lock().take() {
            return Err(e);
        }
        let rows = self.snapshot.lock().clone();
        Ok(futures::stream::iter(rows).boxed())
    }

    async fn subscribe_changes(&self, _plan: &QueryPlan) -> Result<ChangeStream, BackendError> {
        if let Some(e) = self.subscribe_error.lock().take() {
            return Err(e);
        }
        let rx = self
            .feed_rx
            .lock()
            .take()
            .ok_or_else(|| BackendError::Unavailable("feed already taken".into()))?;
        let stream =
            futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|i| (i, rx)) });
        Ok(stream.boxed())
    }
}
