mod common;

use async_trait::async_trait;
use common::{ScriptedDatabase, books, context, key, plan, wait_until};
use search_provider::backend::memory::{ListOp, MemoryDatabase, MemoryLists};
use search_provider::backend::{ChangeEvent, ChangeStream, Database, FeedState, RecordCursor};
use search_provider::query::QueryPlan;
use search_provider::errors::{BackendError, SessionError};
use search_provider::session::{SearchSession, SessionEvent, SessionState};
use std::sync::Arc;

const NAME: &str = r#"search?{"table":"books","query":[]}"#;

fn set(entries: &[&str]) -> ListOp {
    ListOp::Set { name: NAME.into(), entries: entries.iter().map(|s| s.to_string()).collect() }
}

async fn settled(session: &SearchSession) -> SessionState {
    tokio::time::timeout(
        common::TIMEOUT,
        session.wait_for_state(|s| *s != SessionState::Bootstrapping),
    )
    .await
    .expect("session left bootstrapping")
}

fn open(
    db: &Arc<ScriptedDatabase>,
    lists: &MemoryLists,
) -> (SearchSession, tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) {
    let (ctx, rx) = context(db.clone(), Arc::new(lists.clone()));
    (SearchSession::open(NAME, plan(NAME), &ctx), rx)
}

#[tokio::test]
async fn feed_without_initial_is_merged_onto_the_cursor_once() {
    let db = ScriptedDatabase::new(vec![key("a"), key("b")]);
    db.push(ChangeEvent::inserted(key("c")));
    db.push(ChangeEvent::inserted(key("b")));
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);

    assert_eq!(settled(&session).await, SessionState::Ready);
    assert_eq!(lists.entries(NAME), Some(vec!["a".into(), "b".into(), "c".into()]));
    assert_eq!(lists.journal_for(NAME), vec![set(&["a", "b", "c"])]);
}

#[tokio::test]
async fn initial_result_set_replaces_a_stale_cursor() {
    // `a` was deleted and `c` inserted between the query and the subscription.
    let db = ScriptedDatabase::new(vec![key("a"), key("b")]);
    db.push(ChangeEvent::State(FeedState::Initial));
    db.push(ChangeEvent::inserted(key("b")));
    db.push(ChangeEvent::inserted(key("c")));
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);

    assert_eq!(settled(&session).await, SessionState::Ready);
    assert_eq!(lists.journal_for(NAME), vec![set(&["b", "c"])]);

    // `a` never comes back through the feed, so nothing would ever remove it.
    db.push(ChangeEvent::removed(key("c")));
    wait_until("c removed", || lists.entries(NAME) == Some(vec!["b".into()])).await;
}

/// Inserts a newer book after the one-shot query ran but before the changefeed opens.
struct WriteBeforeFeed {
    inner: MemoryDatabase,
}

#[async_trait]
impl Database for WriteBeforeFeed {
    async fn query(&self, plan: &QueryPlan) -> Result<RecordCursor, BackendError> {
        self.inner.query(plan).await
    }

    async fn subscribe_changes(&self, plan: &QueryPlan) -> Result<ChangeStream, BackendError> {
        self.inner
            .insert("books", serde_json::json!({"ds_id": "hp", "language": "English", "released": 1997}))
            .unwrap();
        self.inner.subscribe_changes(plan).await
    }
}

#[tokio::test]
async fn write_between_query_and_feed_keeps_a_single_newest_entry() {
    let newest = r#"search?{"table":"books","query":[],"order":"released","desc":true,"limit":1}"#;
    let memory = MemoryDatabase::new("ds_id");
    for b in books() {
        memory.insert("books", b).unwrap();
    }
    let db = Arc::new(WriteBeforeFeed { inner: memory });
    let lists = MemoryLists::new();
    let (ctx, _rx) = context(db.clone(), Arc::new(lists.clone()));
    let session = SearchSession::open(newest, plan(newest), &ctx);

    assert_eq!(settled(&session).await, SessionState::Ready);
    assert_eq!(lists.entries(newest), Some(vec!["hp".into()]));

    assert!(db.inner.delete("books", "lor"));
    assert!(db.inner.delete("books", "hp"));
    wait_until("window moves to lpp", || lists.entries(newest) == Some(vec!["lpp".into()]))
        .await;
}

#[tokio::test]
async fn delete_during_bootstrap_is_absorbed() {
    let db = ScriptedDatabase::new(vec![key("a"), key("b")]);
    db.push(ChangeEvent::removed(key("a")));
    db.push(ChangeEvent::removed(key("zz")));
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);

    assert_eq!(settled(&session).await, SessionState::Ready);
    assert_eq!(lists.journal_for(NAME), vec![set(&["b"])]);
}

#[tokio::test]
async fn duplicate_inserts_stay_single_entries() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.push(ChangeEvent::inserted(key("a")));
    db.push(ChangeEvent::inserted(key("a")));
    db.push(ChangeEvent::State(FeedState::Ready));
    db.push(ChangeEvent::inserted(key("a")));
    db.push(ChangeEvent::inserted(key("b")));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);

    assert_eq!(settled(&session).await, SessionState::Ready);
    wait_until("b added", || lists.entries(NAME) == Some(vec!["a".into(), "b".into()])).await;
    assert_eq!(
        lists.journal_for(NAME),
        vec![set(&["a"]), ListOp::Add { name: NAME.into(), entry: "b".into() }]
    );
}

#[tokio::test]
async fn live_changes_become_adds_and_removes() {
    let db = ScriptedDatabase::new(vec![key("a"), key("b")]);
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);
    assert_eq!(settled(&session).await, SessionState::Ready);

    db.push(ChangeEvent::inserted(key("c")));
    db.push(ChangeEvent::removed(key("a")));
    // Still matching after an update: no change.
    db.push(ChangeEvent::Data { old_value: Some(key("b")), new_value: Some(key("b")) });
    db.push(ChangeEvent::Data { old_value: None, new_value: None });
    db.push(ChangeEvent::removed(key("nope")));
    db.push(ChangeEvent::State(FeedState::Ready));
    db.push(ChangeEvent::inserted(key("d")));

    wait_until("d added", || lists.entries(NAME).is_some_and(|e| e.contains(&"d".to_string())))
        .await;
    assert_eq!(lists.entries(NAME), Some(vec!["b".into(), "c".into(), "d".into()]));
    assert_eq!(
        lists.journal_for(NAME),
        vec![
            set(&["a", "b"]),
            ListOp::Add { name: NAME.into(), entry: "c".into() },
            ListOp::Remove { name: NAME.into(), entry: "a".into() },
            ListOp::Add { name: NAME.into(), entry: "d".into() },
        ]
    );
}

#[tokio::test]
async fn records_without_a_key_are_skipped() {
    let db = ScriptedDatabase::new(vec![serde_json::json!({"other": 1}), key("a")]);
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);

    assert_eq!(settled(&session).await, SessionState::Ready);
    assert_eq!(lists.entries(NAME), Some(vec!["a".into()]));
}

#[tokio::test]
async fn query_failure_is_initial_retrieval_and_creates_no_list() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.fail_query(BackendError::Query("boom".into()));
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);

    assert_eq!(
        settled(&session).await,
        SessionState::Failed(SessionError::InitialRetrieval(BackendError::Query("boom".into())))
    );
    assert!(!lists.exists(NAME));
    assert!(lists.journal().is_empty());
}

#[tokio::test]
async fn subscribe_failure_is_initial_retrieval() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.fail_subscribe(BackendError::Unavailable("down".into()));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);

    assert!(matches!(
        settled(&session).await,
        SessionState::Failed(SessionError::InitialRetrieval(BackendError::Unavailable(_)))
    ));
    assert!(!lists.exists(NAME));
}

#[tokio::test]
async fn cursor_error_is_initial_retrieval() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.break_snapshot(BackendError::Query("cursor".into()));
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);

    assert!(matches!(settled(&session).await, SessionState::Failed(SessionError::InitialRetrieval(_))));
    assert!(!lists.exists(NAME));
}

#[tokio::test]
async fn feed_ending_before_ready_is_initial_retrieval() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.push(ChangeEvent::State(FeedState::Initial));
    db.end_feed();
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);

    assert!(matches!(settled(&session).await, SessionState::Failed(SessionError::InitialRetrieval(_))));
    assert!(!lists.exists(NAME));
}

#[tokio::test]
async fn feed_error_after_ready_is_change_notification_and_keeps_entries() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);
    assert_eq!(settled(&session).await, SessionState::Ready);

    db.push_error(BackendError::Feed("lost".into()));
    let state = tokio::time::timeout(common::TIMEOUT, session.wait_for_state(SessionState::is_terminal))
        .await
        .unwrap();
    assert_eq!(
        state,
        SessionState::Failed(SessionError::ChangeNotification(BackendError::Feed("lost".into())))
    );
    assert_eq!(lists.entries(NAME), Some(vec!["a".into()]));

    // Nothing is applied after the failure.
    db.push(ChangeEvent::inserted(key("b")));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(lists.entries(NAME), Some(vec!["a".into()]));
}

#[tokio::test]
async fn publish_failure_after_ready_is_change_notification() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (session, _rx) = open(&db, &lists);
    assert_eq!(settled(&session).await, SessionState::Ready);

    lists.fail_writes(Some(BackendError::Publish("read-only".into())));
    db.push(ChangeEvent::inserted(key("b")));
    let state = tokio::time::timeout(common::TIMEOUT, session.wait_for_state(SessionState::is_terminal))
        .await
        .unwrap();
    assert_eq!(
        state,
        SessionState::Failed(SessionError::ChangeNotification(BackendError::Publish(
            "read-only".into()
        )))
    );
}

#[tokio::test]
async fn publish_failure_before_ready_is_initial_retrieval_and_creates_no_list() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    lists.fail_writes(Some(BackendError::Publish("ro".into())));
    let (mut session, _rx) = open(&db, &lists);

    assert_eq!(
        settled(&session).await,
        SessionState::Failed(SessionError::InitialRetrieval(BackendError::Publish("ro".into())))
    );
    assert!(!lists.exists(NAME));

    lists.fail_writes(None);
    session.close().await;
    assert!(!lists.exists(NAME));
    assert!(lists.journal().is_empty());
}

#[tokio::test]
async fn close_is_idempotent_and_deletes_the_list_once() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (mut session, _rx) = open(&db, &lists);
    assert_eq!(settled(&session).await, SessionState::Ready);

    session.close().await;
    session.close().await;
    assert!(session.is_closed());
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!lists.exists(NAME));
    assert_eq!(lists.journal_for(NAME), vec![set(&["a"]), ListOp::Delete { name: NAME.into() }]);

    // Notifications after close are dropped.
    db.push(ChangeEvent::inserted(key("b")));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert!(!lists.exists(NAME));
}

#[tokio::test]
async fn close_during_bootstrap_never_creates_the_list() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.push(ChangeEvent::State(FeedState::Initial));
    let lists = MemoryLists::new();
    let (mut session, _rx) = open(&db, &lists);

    session.close().await;
    db.push(ChangeEvent::State(FeedState::Ready));
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(session.state(), SessionState::Closed);
    assert!(lists.journal().is_empty());
}

#[tokio::test]
async fn external_deletion_detaches_the_session() {
    let db = ScriptedDatabase::new(vec![key("a")]);
    db.push(ChangeEvent::State(FeedState::Ready));
    let lists = MemoryLists::new();
    let (mut session, mut rx) = open(&db, &lists);
    assert_eq!(settled(&session).await, SessionState::Ready);

    assert!(lists.delete_list(NAME));
    let event = tokio::time::timeout(common::TIMEOUT, rx.recv()).await.unwrap();
    assert_eq!(event, Some(SessionEvent::Detached { name: NAME.into(), session_id: session.id() }));
    assert_eq!(session.state(), SessionState::Closed);

    // The session no longer owns the list: closing does not delete or recreate it.
    session.close().await;
    assert_eq!(lists.journal_for(NAME), vec![set(&["a"]), ListOp::Delete { name: NAME.into() }]);
}
