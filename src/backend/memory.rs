//! In-process database and list-publishing backends.
//!
//! `MemoryDatabase` keeps named tables of JSON objects and serves plans and changefeeds
//! over them. `MemoryLists` keeps published lists, an operation journal and the
//! subscription listeners.

use super::{
    ChangeEvent, ChangeStream, Database, FeedState, ListBackend, ListHandle, RecordCursor,
    SubscriptionEvent, SubscriptionFeed, primary_key_of,
};
use crate::errors::{BackendError, ProviderError};
use crate::query::{CompiledPlan, QueryPlan};
use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::{BufRead, BufReader, Read};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Writes kept by [`MemoryLists::journal`] unless configured otherwise.
pub const DEFAULT_JOURNAL_CAPACITY: usize = 10_000;

type FeedSender = mpsc::UnboundedSender<Result<ChangeEvent, BackendError>>;

struct Feed {
    plan: CompiledPlan,
    tx: FeedSender,
    // current ids inside the window, only tracked for limited plans
    window: Vec<Value>,
}

#[derive(Default)]
struct Table {
    rows: BTreeMap<String, Value>,
    feeds: Vec<Feed>,
}

impl Table {
    fn publish(&mut self, old: Option<&Value>, new: Option<&Value>) {
        let rows = &self.rows;
        self.feeds.retain_mut(|feed| {
            let events = if feed.plan.is_windowed() {
                let window = feed.plan.run(rows.values());
                let removed: Vec<Value> =
                    feed.window.iter().filter(|v| !window.contains(v)).cloned().collect();
                let added: Vec<Value> =
                    window.iter().filter(|v| !feed.window.contains(v)).cloned().collect();
                feed.window = window;
                removed
                    .into_iter()
                    .map(ChangeEvent::removed)
                    .chain(added.into_iter().map(ChangeEvent::inserted))
                    .collect()
            } else {
                let was = old.is_some_and(|r| feed.plan.matches(r));
                let is = new.is_some_and(|r| feed.plan.matches(r));
                match (was, is, old, new) {
                    (false, true, _, Some(n)) => vec![ChangeEvent::inserted(feed.plan.project(n))],
                    (true, false, Some(o), _) => vec![ChangeEvent::removed(feed.plan.project(o))],
                    _ => Vec::new(),
                }
            };
            events.into_iter().all(|e| feed.tx.send(Ok(e)).is_ok())
        });
    }
}

#[derive(Default)]
struct Faults {
    next_query: Option<BackendError>,
    next_subscribe: Option<BackendError>,
}

/// Tables of JSON records keyed by their primary-key field.
pub struct MemoryDatabase {
    primary_key: String,
    tables: RwLock<HashMap<String, Table>>,
    faults: Mutex<Faults>,
}

impl std::fmt::Debug for MemoryDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDatabase")
            .field("primary_key", &self.primary_key)
            .field("tables", &self.table_names())
            .finish()
    }
}

impl MemoryDatabase {
    pub fn new(primary_key: impl Into<String>) -> Self {
        Self {
            primary_key: primary_key.into(),
            tables: RwLock::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
        }
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    /// Create a table if it doesn't exist.
    pub fn create_table(&self, name: &str) {
        self.tables.write().entry(name.to_string()).or_default();
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self, table: &str) -> usize {
        self.tables.read().get(table).map_or(0, |t| t.rows.len())
    }

    pub fn get(&self, table: &str, id: &str) -> Option<Value> {
        self.tables.read().get(table).and_then(|t| t.rows.get(id).cloned())
    }

    /// Number of open changefeeds on `table`.
    pub fn feed_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .get(table)
            .map_or(0, |t| t.feeds.iter().filter(|f| !f.tx.is_closed()).count())
    }

    fn key_of(&self, record: &Value) -> Result<String, BackendError> {
        if !record.is_object() {
            return Err(BackendError::Query("records must be JSON objects".into()));
        }
        primary_key_of(record, &self.primary_key).ok_or_else(|| {
            BackendError::Query(format!("record has no primary key `{}`", self.primary_key))
        })
    }

    /// Inserts a new record, creating the table on first use.
    ///
    /// # Errors
    /// Fails when the record has no primary key or the key is already taken.
    pub fn insert(&self, table: &str, record: Value) -> Result<String, BackendError> {
        let id = self.key_of(&record)?;
        let mut tables = self.tables.write();
        let t = tables.entry(table.to_string()).or_default();
        if t.rows.contains_key(&id) {
            return Err(BackendError::Query(format!("duplicate primary key `{id}` in `{table}`")));
        }
        t.rows.insert(id.clone(), record);
        let new = t.rows.get(&id).cloned();
        t.publish(None, new.as_ref());
        Ok(id)
    }

    /// Replaces an existing record.
    ///
    /// # Errors
    /// Fails when the record has no primary key or no such record exists.
    pub fn update(&self, table: &str, record: Value) -> Result<String, BackendError> {
        let id = self.key_of(&record)?;
        let mut tables = self.tables.write();
        let t = tables
            .get_mut(table)
            .ok_or_else(|| BackendError::Query(format!("table `{table}` does not exist")))?;
        if !t.rows.contains_key(&id) {
            return Err(BackendError::Query(format!("no record `{id}` in `{table}`")));
        }
        let old = t.rows.insert(id.clone(), record.clone());
        t.publish(old.as_ref(), Some(&record));
        Ok(id)
    }

    /// Insert or replace.
    ///
    /// # Errors
    /// Fails when the record has no primary key.
    pub fn upsert(&self, table: &str, record: Value) -> Result<String, BackendError> {
        let id = self.key_of(&record)?;
        let mut tables = self.tables.write();
        let t = tables.entry(table.to_string()).or_default();
        let old = t.rows.insert(id.clone(), record.clone());
        t.publish(old.as_ref(), Some(&record));
        Ok(id)
    }

    /// Delete a record by id. Returns whether it existed.
    pub fn delete(&self, table: &str, id: &str) -> bool {
        let mut tables = self.tables.write();
        let Some(t) = tables.get_mut(table) else {
            return false;
        };
        match t.rows.remove(id) {
            Some(old) => {
                t.publish(Some(&old), None);
                true
            }
            None => false,
        }
    }

    /// Loads newline-delimited JSON objects into `table`, replacing records with the same key.
    ///
    /// # Errors
    /// Returns an error on unreadable input, invalid JSON or a record without a primary key.
    pub fn load_ndjson<R: Read>(&self, table: &str, reader: R) -> Result<usize, ProviderError> {
        self.create_table(table);
        let mut loaded = 0usize;
        for line in BufReader::new(reader).lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: Value = serde_json::from_str(line)?;
            self.upsert(table, record)?;
            loaded += 1;
        }
        log::info!("loaded {loaded} records into `{table}`");
        Ok(loaded)
    }

    /// Makes the next [`Database::query`] call fail with `error`.
    pub fn fail_next_query(&self, error: BackendError) {
        self.faults.lock().next_query = Some(error);
    }

    /// Makes the next [`Database::subscribe_changes`] call fail with `error`.
    pub fn fail_next_subscribe(&self, error: BackendError) {
        self.faults.lock().next_subscribe = Some(error);
    }

    /// Delivers `error` to every open feed on `table` and closes them.
    pub fn break_feeds(&self, table: &str, error: &BackendError) {
        if let Some(t) = self.tables.write().get_mut(table) {
            for feed in t.feeds.drain(..) {
                let _ = feed.tx.send(Err(error.clone()));
            }
        }
    }

    fn compile(plan: &QueryPlan) -> Result<CompiledPlan, BackendError> {
        CompiledPlan::new(plan).map_err(|e| BackendError::Query(e.to_string()))
    }

    fn missing_table(table: &str) -> BackendError {
        BackendError::Query(format!("table `{table}` does not exist"))
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn query(&self, plan: &QueryPlan) -> Result<RecordCursor, BackendError> {
        if let Some(e) = self.faults.lock().next_query.take() {
            return Err(e);
        }
        let compiled = Self::compile(plan)?;
        let tables = self.tables.read();
        let t = tables.get(&plan.table).ok_or_else(|| Self::missing_table(&plan.table))?;
        let rows = compiled.run(t.rows.values());
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn subscribe_changes(&self, plan: &QueryPlan) -> Result<ChangeStream, BackendError> {
        if let Some(e) = self.faults.lock().next_subscribe.take() {
            return Err(e);
        }
        let compiled = Self::compile(plan)?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut tables = self.tables.write();
            let t = tables.get_mut(&plan.table).ok_or_else(|| Self::missing_table(&plan.table))?;
            let initial = compiled.run(t.rows.values());
            // Queued under the lock so later writes land after `Ready`.
            let _ = tx.send(Ok(ChangeEvent::State(FeedState::Initial)));
            for record in &initial {
                let _ = tx.send(Ok(ChangeEvent::inserted(record.clone())));
            }
            let _ = tx.send(Ok(ChangeEvent::State(FeedState::Ready)));
            let window = if compiled.is_windowed() { initial } else { Vec::new() };
            t.feeds.push(Feed { plan: compiled, tx, window });
        }
        Ok(receiver_stream(rx).boxed())
    }
}

fn receiver_stream<T: Send + 'static>(
    rx: mpsc::UnboundedReceiver<T>,
) -> impl futures::Stream<Item = T> {
    futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) })
}

/// A write recorded by [`MemoryLists`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListOp {
    Set { name: String, entries: Vec<String> },
    Add { name: String, entry: String },
    Remove { name: String, entry: String },
    Delete { name: String },
}

impl ListOp {
    pub fn name(&self) -> &str {
        match self {
            Self::Set { name, .. }
            | Self::Add { name, .. }
            | Self::Remove { name, .. }
            | Self::Delete { name } => name,
        }
    }
}

struct ListState {
    entries: Vec<String>,
    deleted: watch::Sender<bool>,
}

struct Listener {
    pattern: Regex,
    tx: mpsc::UnboundedSender<SubscriptionEvent>,
}

struct ListsInner {
    lists: Mutex<HashMap<String, ListState>>,
    journal: Mutex<VecDeque<ListOp>>,
    journal_capacity: usize,
    observers: Mutex<Vec<mpsc::UnboundedSender<ListOp>>>,
    listeners: Mutex<Vec<Listener>>,
    fail_writes: Mutex<Option<BackendError>>,
}

impl ListsInner {
    fn new(journal_capacity: usize) -> Self {
        Self {
            lists: Mutex::default(),
            journal: Mutex::default(),
            journal_capacity,
            observers: Mutex::default(),
            listeners: Mutex::default(),
            fail_writes: Mutex::default(),
        }
    }

    fn record(&self, op: ListOp) {
        self.observers.lock().retain(|tx| tx.send(op.clone()).is_ok());
        if self.journal_capacity == 0 {
            return;
        }
        let mut journal = self.journal.lock();
        if journal.len() == self.journal_capacity {
            journal.pop_front();
        }
        journal.push_back(op);
    }

    fn remove(&self, name: &str) -> bool {
        let removed = self.lists.lock().remove(name);
        match removed {
            Some(state) => {
                let _ = state.deleted.send(true);
                self.record(ListOp::Delete { name: name.to_string() });
                true
            }
            None => false,
        }
    }
}

/// Published lists kept in memory, shared by clone.
#[derive(Clone)]
pub struct MemoryLists {
    inner: Arc<ListsInner>,
}

impl Default for MemoryLists {
    fn default() -> Self {
        Self::with_journal_capacity(DEFAULT_JOURNAL_CAPACITY)
    }
}

impl MemoryLists {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps only the latest `capacity` writes in the journal; `0` disables it.
    pub fn with_journal_capacity(capacity: usize) -> Self {
        Self { inner: Arc::new(ListsInner::new(capacity)) }
    }

    /// Current entries of a list, `None` if it does not exist.
    pub fn entries(&self, name: &str) -> Option<Vec<String>> {
        self.inner.lists.lock().get(name).map(|s| s.entries.clone())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.inner.lists.lock().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lists.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Retained writes, oldest first.
    pub fn journal(&self) -> Vec<ListOp> {
        self.inner.journal.lock().iter().cloned().collect()
    }

    /// Writes touching `name`, in order.
    pub fn journal_for(&self, name: &str) -> Vec<ListOp> {
        self.inner.journal.lock().iter().filter(|op| op.name() == name).cloned().collect()
    }

    /// Streams every write made from now on.
    pub fn observe(&self) -> mpsc::UnboundedReceiver<ListOp> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.observers.lock().push(tx);
        rx
    }

    /// Deletes a list from outside any session, as another client would.
    pub fn delete_list(&self, name: &str) -> bool {
        self.inner.remove(name)
    }

    /// Makes every list write fail with `error` until cleared with `None`.
    pub fn fail_writes(&self, error: Option<BackendError>) {
        *self.inner.fail_writes.lock() = error;
    }

    /// A client subscribes to `name`.
    pub fn subscribe(&self, name: &str) {
        self.notify(name, true);
    }

    /// A client drops its subscription to `name`.
    pub fn unsubscribe(&self, name: &str) {
        self.notify(name, false);
    }

    fn notify(&self, name: &str, subscribed: bool) {
        self.inner.listeners.lock().retain(|l| {
            !l.pattern.is_match(name)
                || l.tx.send(SubscriptionEvent { name: name.to_string(), subscribed }).is_ok()
        });
    }
}

#[async_trait]
impl ListBackend for MemoryLists {
    fn get_list(&self, name: &str) -> Box<dyn ListHandle> {
        let (pending, deleted) = match self.inner.lists.lock().get(name) {
            Some(state) => (None, state.deleted.subscribe()),
            None => {
                let (tx, rx) = watch::channel(false);
                (Some(tx), rx)
            }
        };
        Box::new(MemoryListHandle {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
            pending,
            deleted,
        })
    }

    async fn listen(&self, pattern: &str) -> Result<SubscriptionFeed, BackendError> {
        let pattern = Regex::new(pattern).map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.listeners.lock().push(Listener { pattern, tx });
        Ok(receiver_stream(rx).boxed())
    }
}

struct MemoryListHandle {
    name: String,
    inner: Arc<ListsInner>,
    // deletion signal of a list that has not been written yet
    pending: Option<watch::Sender<bool>>,
    deleted: watch::Receiver<bool>,
}

impl MemoryListHandle {
    fn write(
        &mut self,
        apply: impl FnOnce(&mut Vec<String>),
        op: ListOp,
    ) -> Result<(), BackendError> {
        if let Some(e) = self.inner.fail_writes.lock().clone() {
            return Err(e);
        }
        let gone = || BackendError::Publish(format!("list `{}` was deleted", self.name));
        if *self.deleted.borrow() {
            return Err(gone());
        }
        {
            let mut lists = self.inner.lists.lock();
            match lists.get_mut(&self.name) {
                Some(state) => apply(&mut state.entries),
                None => {
                    let deleted = self.pending.take().ok_or_else(gone)?;
                    let mut entries = Vec::new();
                    apply(&mut entries);
                    lists.insert(self.name.clone(), ListState { entries, deleted });
                }
            }
        }
        self.inner.record(op);
        Ok(())
    }
}

impl ListHandle for MemoryListHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn set_entries(&mut self, entries: Vec<String>) -> Result<(), BackendError> {
        let op = ListOp::Set { name: self.name.clone(), entries: entries.clone() };
        self.write(|e| *e = entries, op)
    }

    fn add_entry(&mut self, entry: &str) -> Result<(), BackendError> {
        let op = ListOp::Add { name: self.name.clone(), entry: entry.to_string() };
        self.write(|e| e.push(entry.to_string()), op)
    }

    fn remove_entry(&mut self, entry: &str) -> Result<(), BackendError> {
        let op = ListOp::Remove { name: self.name.clone(), entry: entry.to_string() };
        self.write(
            |e| {
                if let Some(pos) = e.iter().position(|x| x == entry) {
                    e.remove(pos);
                }
            },
            op,
        )
    }

    fn delete(&mut self) -> Result<(), BackendError> {
        if let Some(never_written) = self.pending.take() {
            let _ = never_written.send(true);
            return Ok(());
        }
        if *self.deleted.borrow() {
            return Ok(());
        }
        self.inner.remove(&self.name);
        Ok(())
    }

    fn deleted(&self) -> watch::Receiver<bool> {
        self.deleted.clone()
    }
}
