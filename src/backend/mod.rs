//! Collaborator seams: the database that runs plans and the list-publishing service.
//!
//! The session and registry only talk to these traits. [`memory`] provides in-process
//! implementations of both.

pub mod memory;

use crate::errors::BackendError;
use crate::query::QueryPlan;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use tokio::sync::watch;

/// A record as returned by the database. After the plan's projection this is
/// `{ "<primary key>": id }`.
pub type Record = Value;

/// One-shot result of [`Database::query`].
pub type RecordCursor = BoxStream<'static, Result<Record, BackendError>>;

/// Long-lived result of [`Database::subscribe_changes`].
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, BackendError>>;

/// Stream of subscribe/unsubscribe notifications from [`ListBackend::listen`].
pub type SubscriptionFeed = BoxStream<'static, SubscriptionEvent>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    /// The feed has started delivering the initial result set.
    Initial,
    /// The initial result set is complete; everything after this is a live change.
    Ready,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    State(FeedState),
    Data { old_value: Option<Record>, new_value: Option<Record> },
}

impl ChangeEvent {
    pub fn inserted(record: Record) -> Self {
        Self::Data { old_value: None, new_value: Some(record) }
    }

    pub fn removed(record: Record) -> Self {
        Self::Data { old_value: Some(record), new_value: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub name: String,
    pub subscribed: bool,
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Executes `plan` once.
    async fn query(&self, plan: &QueryPlan) -> Result<RecordCursor, BackendError>;

    /// Opens a changefeed for `plan`. The feed emits `State(Initial)`, the current matches
    /// as inserts, `State(Ready)`, then one event per change.
    async fn subscribe_changes(&self, plan: &QueryPlan) -> Result<ChangeStream, BackendError>;
}

#[async_trait]
pub trait ListBackend: Send + Sync {
    /// Returns a handle to the published list `name`, creating it on first write.
    fn get_list(&self, name: &str) -> Box<dyn ListHandle>;

    /// Starts reporting subscriptions to list names matching the regular expression `pattern`.
    async fn listen(&self, pattern: &str) -> Result<SubscriptionFeed, BackendError>;
}

/// Write access to one published list. The list is a mirror; it is never read back.
pub trait ListHandle: Send + Sync {
    fn name(&self) -> &str;

    /// # Errors
    /// Returns [`BackendError::Publish`] when the list cannot be written.
    fn set_entries(&mut self, entries: Vec<String>) -> Result<(), BackendError>;

    /// # Errors
    /// Returns [`BackendError::Publish`] when the list cannot be written.
    fn add_entry(&mut self, entry: &str) -> Result<(), BackendError>;

    /// # Errors
    /// Returns [`BackendError::Publish`] when the list cannot be written.
    fn remove_entry(&mut self, entry: &str) -> Result<(), BackendError>;

    /// # Errors
    /// Returns [`BackendError::Publish`] when the list cannot be deleted.
    fn delete(&mut self) -> Result<(), BackendError>;

    /// Flips to `true` once the list has been deleted, by anyone.
    fn deleted(&self) -> watch::Receiver<bool>;
}

/// Extracts the primary key of a record as a list entry.
///
/// Accepts a projected object (`{ "ds_id": "don" }`) or a bare key value. String and
/// numeric keys are supported.
pub fn primary_key_of(record: &Record, field: &str) -> Option<String> {
    let key = match record {
        Value::Object(map) => map.get(field)?,
        other => other,
    };
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
