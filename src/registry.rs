//! Reference-counted map from subscription name to live session.

use crate::errors::ProviderError;
use crate::query;
use crate::session::{SearchSession, SessionContext, SessionState};
use std::collections::HashMap;
use uuid::Uuid;

struct Entry {
    session: SearchSession,
    subscribers: usize,
}

/// Point-in-time view of one registry entry.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub name: String,
    pub session_id: Uuid,
    pub subscribers: usize,
    pub state: tokio::sync::watch::Receiver<SessionState>,
}

impl SessionSummary {
    /// Current state of the session, read live.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }
}

/// Owns every [`SearchSession`]. Not shared; the provider loop mutates it one event at a time.
pub struct SubscriptionRegistry {
    ctx: SessionContext,
    entries: HashMap<String, Entry>,
}

impl SubscriptionRegistry {
    pub fn new(ctx: SessionContext) -> Self {
        Self { ctx, entries: HashMap::new() }
    }

    /// Applies one subscribe (`added = true`) or unsubscribe notification.
    ///
    /// Entries are removed when their count reaches zero, so every stored entry has at
    /// least one subscriber.
    ///
    /// # Errors
    /// [`ProviderError::RegistryInvariant`] if the count would overflow.
    pub async fn on_subscription_event(
        &mut self,
        name: &str,
        added: bool,
    ) -> Result<(), ProviderError> {
        if added {
            self.subscribe(name)
        } else {
            self.unsubscribe(name).await;
            Ok(())
        }
    }

    fn subscribe(&mut self, name: &str) -> Result<(), ProviderError> {
        if let Some(entry) = self.entries.get_mut(name) {
            debug_assert!(entry.subscribers > 0, "{name} is registered without subscribers");
            entry.subscribers = entry.subscribers.checked_add(1).ok_or_else(|| {
                ProviderError::RegistryInvariant(format!("{name}: subscriber count overflow"))
            })?;
            log::debug!("{name}: {} subscribers", entry.subscribers);
            return Ok(());
        }

        let descriptor = match query::parse(name) {
            Ok(d) => d,
            Err(e) => {
                log::warn!("{e}");
                return Ok(());
            }
        };
        let plan = query::translate(&descriptor, &self.ctx.primary_key);
        log::info!("Adding search {name}");
        let session = SearchSession::open(name, plan, &self.ctx);
        self.entries.insert(name.to_string(), Entry { session, subscribers: 1 });
        Ok(())
    }

    async fn unsubscribe(&mut self, name: &str) {
        let Some(entry) = self.entries.get_mut(name) else {
            log::debug!("unsubscribe for unknown search {name}");
            return;
        };
        debug_assert!(entry.subscribers > 0, "{name} has no subscribers to remove");
        entry.subscribers = entry.subscribers.saturating_sub(1);
        if entry.subscribers > 0 {
            log::debug!("{name}: {} subscribers", entry.subscribers);
            return;
        }
        if let Some(mut entry) = self.entries.remove(name) {
            entry.session.close().await;
        }
    }

    /// Drops the entry for `name` if it still holds the session `session_id`.
    pub async fn on_session_detached(&mut self, name: &str, session_id: Uuid) {
        let current = self.entries.get(name).map(|e| e.session.id());
        if current != Some(session_id) {
            log::debug!("stale detach for {name} ({session_id})");
            return;
        }
        if let Some(mut entry) = self.entries.remove(name) {
            log::info!("search {name} detached with {} subscribers", entry.subscribers);
            entry.session.close().await;
        }
    }

    /// Closes every session.
    pub async fn close_all(&mut self) {
        for (name, mut entry) in self.entries.drain() {
            log::debug!("closing {name}");
            entry.session.close().await;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn subscriber_count(&self, name: &str) -> Option<usize> {
        self.entries.get(name).map(|e| e.subscribers)
    }

    pub fn session_id(&self, name: &str) -> Option<Uuid> {
        self.entries.get(name).map(|e| e.session.id())
    }

    pub fn session(&self, name: &str) -> Option<&SearchSession> {
        self.entries.get(name).map(|e| &e.session)
    }

    pub fn session_state(&self, name: &str) -> Option<SessionState> {
        self.entries.get(name).map(|e| e.session.state())
    }

    /// Entries sorted by name.
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut out: Vec<SessionSummary> = self
            .entries
            .iter()
            .map(|(name, e)| SessionSummary {
                name: name.clone(),
                session_id: e.session.id(),
                subscribers: e.subscribers,
                state: e.session.watch_state(),
            })
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }
}
