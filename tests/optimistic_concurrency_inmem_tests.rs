// End to end in memory tests for optimistic concurrency across stream sessions.
//
// Responsibilities
// - Drive sessions through the store facade with the head cache installed.
// - Assert revision and sequence bookkeeping against what the backing store reports.

use chrono::Utc;
use event_store::core::commit::{CommitAttempt, EventMessage, Headers};
use event_store::core::ports::{EventStoreError, PersistStreams};
use event_store::shell::config::EventStoreConfig;
use event_store::shell::state::AppState;
use rstest::{fixture, rstest};
use serde_json::json;
use uuid::Uuid;

fn deposit(amount: f64) -> EventMessage {
    EventMessage::new(json!({ "type": "FundsDeposited", "amount": amount }))
}

#[fixture]
fn before_each() -> AppState {
    AppState::in_memory(&EventStoreConfig::default())
}

#[rstest]
#[tokio::test]
async fn commits_advance_sequence_and_revision_one_commit_at_a_time(before_each: AppState) {
    let state = before_each;
    let mut stream = state.store.open_stream("Account", "1").await.unwrap();

    stream.add(deposit(10.0));
    stream.commit_changes(Uuid::now_v7()).await.unwrap();
    assert_eq!((stream.commit_sequence(), stream.stream_revision()), (1, 1));

    stream.add(deposit(20.0));
    stream.commit_changes(Uuid::now_v7()).await.unwrap();
    assert_eq!((stream.commit_sequence(), stream.stream_revision()), (2, 2));

    let reader = state.store.open_stream_range("Account", "1", 1, 2).await.unwrap();
    let events = reader.committed_events().await.unwrap().try_collect().await.unwrap();
    assert_eq!(events, vec![deposit(10.0), deposit(20.0)]);
}

#[rstest]
#[tokio::test]
async fn revision_grows_by_the_event_count_of_every_commit(before_each: AppState) {
    let state = before_each;
    let mut stream = state.store.open_stream("Account", "7").await.unwrap();
    let mut expected_revision = 0;
    for (sequence, batch) in [3usize, 1, 4, 2].into_iter().enumerate() {
        for n in 0..batch {
            stream.add(deposit(n as f64));
        }
        stream.commit_changes(Uuid::now_v7()).await.unwrap();
        expected_revision += batch as u64;
        assert_eq!(stream.commit_sequence(), sequence as u64 + 1);
        assert_eq!(stream.stream_revision(), expected_revision);
    }
    let events = stream.committed_events().await.unwrap().try_collect().await.unwrap();
    assert_eq!(events.len() as u64, expected_revision);
}

#[rstest]
#[tokio::test]
async fn a_stale_session_conflicts_then_recovers_and_retries(before_each: AppState) {
    let state = before_each;
    let mut a = state.store.open_stream("Account", "1").await.unwrap();
    let mut b = state.store.open_stream("Account", "1").await.unwrap();

    a.add(deposit(10.0));
    a.commit_changes(Uuid::now_v7()).await.unwrap();
    assert_eq!(a.stream_revision(), 1);

    b.add(deposit(99.0));
    let result = b.commit_changes(Uuid::now_v7()).await;
    assert!(matches!(result, Err(EventStoreError::ConcurrencyConflict { .. })));

    let persistence = &state.persistence;
    assert_eq!(
        b.stream_revision(),
        persistence.current_stream_revision("Account", "1", 0, u64::MAX).await.unwrap()
    );
    assert_eq!(
        b.commit_sequence(),
        persistence.current_commit_sequence("Account", "1", 0, u64::MAX).await.unwrap()
    );
    assert_eq!(b.uncommitted_events(), &[deposit(99.0)]);

    b.commit_changes(Uuid::now_v7()).await.unwrap();
    assert_eq!(b.stream_revision(), 2);
    assert_eq!(b.commit_sequence(), 2);
}

#[rstest]
#[tokio::test]
async fn the_backing_store_rejects_a_stale_attempt_on_its_own(before_each: AppState) {
    let state = before_each;
    let mut writer = state.store.open_stream("Account", "1").await.unwrap();
    writer.add(deposit(1.0));
    writer.commit_changes(Uuid::now_v7()).await.unwrap();

    let stale = CommitAttempt::new(
        "Account",
        "1",
        1,
        Uuid::now_v7(),
        1,
        Utc::now(),
        Headers::new(),
        vec![deposit(2.0)],
    );
    let result = state.persistence.append(&stale).await;
    assert!(matches!(result, Err(EventStoreError::ConcurrencyConflict { .. })));
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_on_one_stream_have_a_single_winner(before_each: AppState) {
    let state = before_each;
    state.persistence.set_delay_append_ms(20);

    let mut writers = Vec::new();
    for n in 0..4 {
        let mut stream = state.store.open_stream("Account", "race").await.unwrap();
        stream.add(deposit(n as f64));
        writers.push(tokio::spawn(async move { stream.commit_changes(Uuid::now_v7()).await }));
    }

    let mut winners = 0;
    for writer in writers {
        match writer.await.unwrap() {
            Ok(()) => winners += 1,
            Err(err) => assert!(err.is_concurrency_conflict(), "unexpected error: {err}"),
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(
        state
            .persistence
            .current_commit_sequence("Account", "race", 0, u64::MAX)
            .await
            .unwrap(),
        1
    );
}

#[rstest]
#[tokio::test]
async fn independent_streams_do_not_conflict(before_each: AppState) {
    let state = before_each;
    let mut first = state.store.open_stream("Account", "1").await.unwrap();
    let mut second = state.store.open_stream("Account", "2").await.unwrap();
    first.add(deposit(1.0));
    second.add(deposit(2.0));
    first.commit_changes(Uuid::now_v7()).await.unwrap();
    second.commit_changes(Uuid::now_v7()).await.unwrap();
    assert_eq!(first.stream_revision(), 1);
    assert_eq!(second.stream_revision(), 1);
    assert_eq!(state.head_cache.len().await, 2);
}

#[rstest]
#[tokio::test]
async fn a_historical_read_after_eviction_does_not_lock_out_writers() {
    let config = EventStoreConfig {
        max_streams_to_track: 1,
        ..EventStoreConfig::default()
    };
    let state = AppState::in_memory(&config);
    let mut writer = state.store.open_stream("Account", "1").await.unwrap();
    for n in 0..3 {
        writer.add(deposit(n as f64));
        writer.commit_changes(Uuid::now_v7()).await.unwrap();
    }
    let mut other = state.store.open_stream("Account", "2").await.unwrap();
    other.add(deposit(1.0));
    other.commit_changes(Uuid::now_v7()).await.unwrap();

    let history = state.store.open_stream_range("Account", "1", 1, 1).await.unwrap();
    let events = history.committed_events().await.unwrap().try_collect().await.unwrap();
    assert_eq!(events, vec![deposit(0.0)]);

    writer.add(deposit(3.0));
    let first = writer.commit_changes(Uuid::now_v7()).await;
    assert!(matches!(first, Err(EventStoreError::StorageFault(_))));
    writer.commit_changes(Uuid::now_v7()).await.expect("retry after a stale head failed");
    assert_eq!((writer.commit_sequence(), writer.stream_revision()), (4, 4));
}
