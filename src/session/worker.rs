use super::bootstrap::BootstrapSet;
use super::{SESSION_LOG_TARGET, SessionContext, SessionEvent, SessionState};
use crate::backend::{ChangeEvent, ChangeStream, FeedState, ListHandle, Record, primary_key_of};
use crate::errors::{BackendError, SessionError};
use crate::query::QueryPlan;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Owned = Option<Box<dyn ListHandle>>;

/// The body of a session task. Returns the list handle if the session still owns it.
pub(super) struct Worker {
    pub id: Uuid,
    pub name: String,
    pub plan: QueryPlan,
    pub ctx: SessionContext,
    pub state: Arc<watch::Sender<SessionState>>,
    pub cancel: CancellationToken,
}

/// Outcome of one bootstrap step.
enum Step<T> {
    Continue(T),
    Stop(Owned),
}

impl Worker {
    pub async fn run(self) -> Owned {
        let cancel = self.cancel.clone();
        let db = Arc::clone(&self.ctx.database);
        let started = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            r = async { tokio::join!(db.query(&self.plan), db.subscribe_changes(&self.plan)) } => r,
        };
        let (cursor, feed) = match started {
            (Ok(c), Ok(f)) => (c, f),
            (Err(e), _) | (_, Err(e)) => return self.fail(SessionError::InitialRetrieval(e), None),
        };

        let mut set = BootstrapSet::default();
        let mut cursor = cursor;
        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                n = cursor.next() => n,
            };
            match next {
                Some(Ok(record)) => {
                    if let Some(id) = self.key_of(&record) {
                        set.insert(id);
                    }
                }
                Some(Err(e)) => return self.fail(SessionError::InitialRetrieval(e), None),
                None => break,
            }
        }
        drop(cursor);

        let mut feed = feed;
        let (list, entries) = match self.bootstrap(&mut feed, set).await {
            Step::Continue(v) => v,
            Step::Stop(owned) => return owned,
        };
        self.follow(feed, list, entries).await
    }

    /// Folds feed notifications into `set` until the feed reports `Ready`, then publishes.
    ///
    /// A feed that announces `Initial` replays its own result set, which is newer than the
    /// cursor's; the cursor keys are dropped in its favour. Feeds without `Initial` are
    /// merged on top of the cursor.
    async fn bootstrap(
        &self,
        feed: &mut ChangeStream,
        mut set: BootstrapSet,
    ) -> Step<(Box<dyn ListHandle>, Vec<String>)> {
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Step::Stop(None),
                n = feed.next() => n,
            };
            match next {
                Some(Ok(ChangeEvent::State(FeedState::Ready))) => break,
                Some(Ok(ChangeEvent::State(FeedState::Initial))) => {
                    log::trace!(
                        target: SESSION_LOG_TARGET,
                        "{}: feed initializing, replacing {} cursor keys",
                        self.name,
                        set.len()
                    );
                    set = BootstrapSet::default();
                }
                Some(Ok(ChangeEvent::Data { old_value, new_value })) => {
                    if let Some(id) = old_value.as_ref().and_then(|r| self.key_of(r)) {
                        set.remove(&id);
                    }
                    if let Some(id) = new_value.as_ref().and_then(|r| self.key_of(r)) {
                        set.insert(id);
                    }
                }
                Some(Err(e)) => {
                    return Step::Stop(self.fail(SessionError::InitialRetrieval(e), None));
                }
                None => {
                    let e = BackendError::Feed("feed ended before ready".into());
                    return Step::Stop(self.fail(SessionError::InitialRetrieval(e), None));
                }
            }
        }

        let mut list = self.ctx.lists.get_list(&self.name);
        let entries = set.into_entries();
        if let Err(e) = list.set_entries(entries.clone()) {
            return Step::Stop(self.fail(SessionError::InitialRetrieval(e), Some(list)));
        }
        log::info!(
            target: SESSION_LOG_TARGET,
            "Found {} initial matches for {}",
            entries.len(),
            self.name
        );
        self.state.send_replace(SessionState::Ready);
        Step::Continue((list, entries))
    }

    /// Mirrors live changes into `list` until cancelled, failed or detached.
    async fn follow(
        &self,
        mut feed: ChangeStream,
        mut list: Box<dyn ListHandle>,
        mut entries: Vec<String>,
    ) -> Owned {
        let mut deleted = list.deleted();
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Some(list),
                () = list_deleted(&mut deleted) => return self.detach(),
                n = feed.next() => n,
            };
            let applied = match next {
                Some(Ok(ChangeEvent::Data { old_value: None, new_value: Some(record) })) => {
                    self.add(list.as_mut(), &mut entries, &record)
                }
                Some(Ok(ChangeEvent::Data { old_value: Some(record), new_value: None })) => {
                    self.remove(list.as_mut(), &mut entries, &record)
                }
                Some(Ok(ChangeEvent::Data { .. })) => {
                    // The record still matches; membership is unchanged.
                    Ok(())
                }
                Some(Ok(ChangeEvent::State(_))) => Ok(()),
                Some(Err(e)) => Err(e),
                None => Err(BackendError::Feed("feed ended".into())),
            };
            if let Err(e) = applied {
                return self.fail(SessionError::ChangeNotification(e), Some(list));
            }
        }
    }

    fn add(
        &self,
        list: &mut dyn ListHandle,
        entries: &mut Vec<String>,
        record: &Record,
    ) -> Result<(), BackendError> {
        let Some(id) = self.key_of(record) else {
            return Ok(());
        };
        if entries.contains(&id) {
            log::debug!(target: SESSION_LOG_TARGET, "{}: {id} already listed", self.name);
            return Ok(());
        }
        list.add_entry(&id)?;
        log::debug!(target: SESSION_LOG_TARGET, "{}: added {id}", self.name);
        entries.push(id);
        Ok(())
    }

    fn remove(
        &self,
        list: &mut dyn ListHandle,
        entries: &mut Vec<String>,
        record: &Record,
    ) -> Result<(), BackendError> {
        let Some(id) = self.key_of(record) else {
            return Ok(());
        };
        let Some(pos) = entries.iter().position(|e| *e == id) else {
            log::debug!(target: SESSION_LOG_TARGET, "{}: {id} not listed", self.name);
            return Ok(());
        };
        list.remove_entry(&id)?;
        log::debug!(target: SESSION_LOG_TARGET, "{}: removed {id}", self.name);
        entries.remove(pos);
        Ok(())
    }

    fn key_of(&self, record: &Record) -> Option<String> {
        let key = primary_key_of(record, &self.ctx.primary_key);
        if key.is_none() {
            log::warn!("{}: record without usable {}: {record}", self.name, self.ctx.primary_key);
        }
        key
    }

    fn fail(&self, err: SessionError, owned: Owned) -> Owned {
        log::error!("Error for {}: {err}", self.name);
        self.state.send_replace(SessionState::Failed(err));
        owned
    }

    fn detach(&self) -> Owned {
        log::info!(target: SESSION_LOG_TARGET, "list {} deleted externally", self.name);
        self.state.send_replace(SessionState::Closed);
        let event = SessionEvent::Detached { name: self.name.clone(), session_id: self.id };
        if self.ctx.events.send(event).is_err() {
            log::debug!("provider gone; detach of {} not reported", self.name);
        }
        None
    }
}

/// Resolves once the watched list reports deletion. Never resolves if the list outlives
/// its sender without being deleted.
async fn list_deleted(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            if *rx.borrow() {
                return;
            }
            std::future::pending::<()>().await;
        }
    }
}
