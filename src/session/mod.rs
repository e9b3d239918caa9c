//! One live query: snapshot, changefeed and the published id list.
//!
//! A [`SearchSession`] runs a single tokio task that moves through
//! `Bootstrapping → Ready`, ending in `Failed` or `Closed`. While bootstrapping, keys from
//! the one-shot cursor and any early feed notifications are folded into a
//! [`bootstrap::BootstrapSet`]; the feed's `Ready` marker publishes that set in one
//! `set_entries` call. After that every feed notification becomes one `add_entry` or
//! `remove_entry`.

pub mod bootstrap;
mod worker;

use crate::backend::{Database, ListBackend, ListHandle};
use crate::errors::SessionError;
use crate::query::QueryPlan;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use worker::Worker;

pub const SESSION_LOG_TARGET: &str = "search_provider::sessions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Bootstrapping,
    Ready,
    Failed(SessionError),
    Closed,
}

impl SessionState {
    /// True once the session will not process any further notifications.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Closed)
    }
}

/// Messages from session tasks back to the provider loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The published list was deleted from outside; the session has stopped.
    Detached { name: String, session_id: Uuid },
}

/// Everything a session needs from its surroundings. Cheap to clone.
#[derive(Clone)]
pub struct SessionContext {
    pub database: Arc<dyn Database>,
    pub lists: Arc<dyn ListBackend>,
    pub primary_key: String,
    pub events: mpsc::UnboundedSender<SessionEvent>,
}

pub struct SearchSession {
    id: Uuid,
    name: String,
    plan: QueryPlan,
    state: Arc<watch::Sender<SessionState>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Option<Box<dyn ListHandle>>>>,
}

impl std::fmt::Debug for SearchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &*self.state.borrow())
            .finish()
    }
}

impl SearchSession {
    /// Starts the session task. Must be called inside a tokio runtime.
    pub fn open(name: &str, plan: QueryPlan, ctx: &SessionContext) -> Self {
        let id = Uuid::new_v4();
        let state = Arc::new(watch::Sender::new(SessionState::Bootstrapping));
        let cancel = CancellationToken::new();
        log::info!(target: SESSION_LOG_TARGET, "opening search {name} ({id}) plan={plan}");

        let worker = Worker {
            id,
            name: name.to_string(),
            plan: plan.clone(),
            ctx: ctx.clone(),
            state: Arc::clone(&state),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(worker.run());

        Self { id, name: name.to_string(), plan, state, cancel, task: Some(task) }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// A receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Waits until `pred` holds for the current state and returns that state.
    pub async fn wait_for_state(&self, pred: impl Fn(&SessionState) -> bool) -> SessionState {
        let mut rx = self.state.subscribe();
        match rx.wait_for(|s| pred(s)).await {
            Ok(s) => (*s).clone(),
            Err(_) => self.state(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_none()
    }

    /// Stops the task and deletes the published list if this session still owns it.
    ///
    /// Calling it again is a no-op.
    pub async fn close(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.cancel.cancel();
        match task.await {
            Ok(Some(mut list)) => {
                if !*list.deleted().borrow() {
                    log::info!(target: SESSION_LOG_TARGET, "Removing search {}", self.name);
                    if let Err(e) = list.delete() {
                        log::warn!("could not delete list {}: {e}", self.name);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => log::error!("search task for {} ended abnormally: {e}", self.name),
        }
        self.state.send_if_modified(|s| {
            if s.is_terminal() && *s != SessionState::Closed {
                return false;
            }
            *s = SessionState::Closed;
            true
        });
        log::debug!(target: SESSION_LOG_TARGET, "closed search {} ({})", self.name, self.id);
    }
}

impl Drop for SearchSession {
    fn drop(&mut self) {
        // Without an explicit close the feed is still released; the list is left behind.
        self.cancel.cancel();
    }
}
