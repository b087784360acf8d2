// Stream session: one writer's in-flight work on one stream.
//
// Purpose
// - Accumulate uncommitted events and headers, turn them into a commit attempt
//   and keep the known revision and sequence in step with storage.
//
// Responsibilities
// - Committed events and headers are read from storage on demand, never cached.
// - After a concurrency conflict, refresh revision and sequence from storage,
//   keep the uncommitted events for a retry and hand the conflict back.
//
// Boundaries
// - Not shared between tasks: every mutation takes `&mut self`.
// - Never retries a commit on its own.

use crate::application::event_store::OptimisticEventStore;
use crate::core::commit::{CommitAttempt, EventMessage, Headers};
use crate::core::ports::EventStoreError;
use crate::core::read_stream::ReadStream;
use crate::core::snapshot::Snapshot;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct OptimisticEventStream {
    store: OptimisticEventStore,
    bucket_id: String,
    stream_id: String,
    min_revision: u64,
    max_revision: u64,
    stream_revision: u64,
    commit_sequence: u64,
    events: Vec<EventMessage>,
    headers: Headers,
}

impl OptimisticEventStream {
    pub(crate) fn create(store: OptimisticEventStore, bucket_id: &str, stream_id: &str) -> Self {
        Self {
            store,
            bucket_id: bucket_id.to_string(),
            stream_id: stream_id.to_string(),
            min_revision: 0,
            max_revision: u64::MAX,
            stream_revision: 0,
            commit_sequence: 0,
            events: Vec::new(),
            headers: Headers::new(),
        }
    }

    pub(crate) async fn open(
        store: OptimisticEventStore,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<Self, EventStoreError> {
        let mut stream = Self::create(store, bucket_id, stream_id);
        stream.min_revision = min_revision;
        stream.max_revision = max_revision;
        stream.load_position(min_revision, max_revision).await?;
        if min_revision > 0 && stream.commit_sequence == 0 {
            return Err(EventStoreError::StreamNotFound {
                bucket_id: bucket_id.to_string(),
                stream_id: stream_id.to_string(),
            });
        }
        Ok(stream)
    }

    pub(crate) async fn from_snapshot(
        store: OptimisticEventStore,
        snapshot: &Snapshot,
        max_revision: u64,
    ) -> Result<Self, EventStoreError> {
        let mut stream = Self::create(store, &snapshot.bucket_id, &snapshot.stream_id);
        stream.min_revision = snapshot.stream_revision + 1;
        stream.max_revision = max_revision;
        stream
            .load_position(snapshot.stream_revision, max_revision)
            .await?;
        stream.stream_revision = stream.stream_revision.max(snapshot.stream_revision);
        Ok(stream)
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn stream_revision(&self) -> u64 {
        self.stream_revision
    }

    pub fn commit_sequence(&self) -> u64 {
        self.commit_sequence
    }

    /// Events already durable for this stream within the session's revision
    /// window. Every call starts a fresh read.
    pub async fn committed_events(&self) -> Result<ReadStream<EventMessage>, EventStoreError> {
        let (min_revision, max_revision) = (self.min_revision, self.max_revision);
        let mut commits = self
            .store
            .read_range(&self.bucket_id, &self.stream_id, min_revision, max_revision)
            .await?;
        Ok(ReadStream::spawn(self.store.read_buffer(), move |sink| async move {
            while let Some(item) = commits.next().await {
                let commit = match item {
                    Ok(commit) => commit,
                    Err(err) => {
                        sink.fail(err).await;
                        return;
                    }
                };
                for (revision, event) in commit.revisioned_events() {
                    if revision < min_revision || revision > max_revision {
                        continue;
                    }
                    if !sink.send(event.clone()).await {
                        commits.close();
                        return;
                    }
                }
            }
        }))
    }

    /// Headers of every commit in the window merged in commit order; later
    /// commits win on key collisions.
    pub async fn committed_headers(&self) -> Result<Headers, EventStoreError> {
        let mut commits = self
            .store
            .read_range(&self.bucket_id, &self.stream_id, self.min_revision, self.max_revision)
            .await?;
        let mut headers = Headers::new();
        while let Some(commit) = commits.next().await {
            headers.extend(commit?.headers);
        }
        Ok(headers)
    }

    pub fn uncommitted_events(&self) -> &[EventMessage] {
        &self.events
    }

    pub fn uncommitted_headers(&self) -> &Headers {
        &self.headers
    }

    /// Queues an event for the next commit. Events without a body are ignored.
    pub fn add(&mut self, event: EventMessage) {
        if !event.has_body() {
            return;
        }
        debug!(stream_id = %self.stream_id, "appending uncommitted event to stream");
        self.events.push(event);
    }

    pub fn add_header(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.headers.insert(key.into(), value);
    }

    pub async fn commit_changes(&mut self, commit_id: Uuid) -> Result<(), EventStoreError> {
        debug!(
            stream_id = %self.stream_id,
            %commit_id,
            "attempting to commit all changes on stream"
        );
        if self.events.is_empty() {
            warn!(stream_id = %self.stream_id, "there are no outstanding changes to be committed");
            return Ok(());
        }

        let attempt = self.build_commit_attempt(commit_id);
        match self.store.commit(attempt).await {
            Ok(commit) => {
                self.commit_sequence = commit.commit_sequence;
                self.stream_revision = commit.stream_revision;
                self.clear_changes();
                Ok(())
            }
            Err(conflict @ EventStoreError::ConcurrencyConflict { .. }) => {
                info!(
                    stream_id = %self.stream_id,
                    "the stream has changed since the last known commit, refreshing the stream"
                );
                self.load_position(self.stream_revision, u64::MAX).await?;
                Err(conflict)
            }
            Err(err) => Err(err),
        }
    }

    pub fn clear_changes(&mut self) {
        debug!(stream_id = %self.stream_id, "clearing all uncommitted changes on stream");
        self.events.clear();
        self.headers.clear();
    }

    fn build_commit_attempt(&self, commit_id: Uuid) -> CommitAttempt {
        debug!(stream_id = %self.stream_id, %commit_id, "building a commit attempt");
        CommitAttempt::new(
            &self.bucket_id,
            &self.stream_id,
            self.stream_revision + self.events.len() as u64,
            commit_id,
            self.commit_sequence + 1,
            Utc::now(),
            self.headers.clone(),
            self.events.clone(),
        )
    }

    async fn load_position(&mut self, min_revision: u64, max_revision: u64) -> Result<(), EventStoreError> {
        let position = self
            .store
            .persistence()
            .current_position(&self.bucket_id, &self.stream_id, min_revision, max_revision)
            .await?;
        self.commit_sequence = position.commit_sequence;
        self.stream_revision = position.stream_revision;
        Ok(())
    }
}

#[cfg(test)]
mod optimistic_event_stream_tests {
    use super::*;
    use crate::adapters::in_memory::in_memory_persistence::InMemoryPersistence;
    use crate::application::optimistic_pipeline_hook::OptimisticPipelineHook;
    use crate::test_support::fixtures::events::account_events::{
        make_account_created_event, make_funds_transferred_event,
    };
    use rstest::{fixture, rstest};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::join;

    #[fixture]
    fn before_each() -> OptimisticEventStore {
        OptimisticEventStore::new(
            Arc::new(InMemoryPersistence::new()),
            vec![Arc::new(OptimisticPipelineHook::new())],
        )
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_commit_events_and_headers(before_each: OptimisticEventStore) {
        let store = before_each;
        let mut stream = store.open_stream("Account", "1").await.unwrap();
        stream.add_header("Serializer", json!("JsonSerializer"));
        stream.add(make_account_created_event(1, 1000.0));
        stream.add(make_funds_transferred_event(100.0));
        stream.commit_changes(Uuid::now_v7()).await.expect("commit failed");

        assert_eq!(stream.stream_revision(), 2);
        assert_eq!(stream.commit_sequence(), 1);
        assert!(stream.uncommitted_events().is_empty());
        assert!(stream.uncommitted_headers().is_empty());

        let events = stream.committed_events().await.unwrap().try_collect().await.unwrap();
        assert_eq!(events.len(), 2);
        let headers = stream.committed_headers().await.unwrap();
        assert_eq!(headers.get("Serializer"), Some(&json!("JsonSerializer")));
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_ignore_events_without_a_body(before_each: OptimisticEventStore) {
        let store = before_each;
        let mut stream = store.create_stream("Account", "1");
        stream.add(EventMessage::new(serde_json::Value::Null));
        assert!(stream.uncommitted_events().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_do_nothing_when_there_are_no_changes(before_each: OptimisticEventStore) {
        let store = before_each;
        let mut stream = store.open_stream("Account", "1").await.unwrap();
        stream.commit_changes(Uuid::now_v7()).await.unwrap();
        assert_eq!(stream.commit_sequence(), 0);
        assert_eq!(
            store
                .persistence()
                .current_commit_sequence("Account", "1", 0, u64::MAX)
                .await
                .unwrap(),
            0
        );
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_discard_changes_on_clear(before_each: OptimisticEventStore) {
        let store = before_each;
        let mut stream = store.create_stream("Account", "1");
        stream.add(make_account_created_event(1, 1000.0));
        stream.add_header("origin", json!("teller"));
        stream.clear_changes();
        assert!(stream.uncommitted_events().is_empty());
        assert!(stream.uncommitted_headers().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_recover_after_a_conflict_and_keep_pending_events(before_each: OptimisticEventStore) {
        let store = before_each;
        let mut first = store.open_stream("Account", "1").await.unwrap();
        let mut second = store.open_stream("Account", "1").await.unwrap();

        first.add(make_account_created_event(1, 1000.0));
        first.commit_changes(Uuid::now_v7()).await.unwrap();

        second.add(make_funds_transferred_event(100.0));
        let result = second.commit_changes(Uuid::now_v7()).await;
        assert!(matches!(result, Err(EventStoreError::ConcurrencyConflict { .. })));
        assert_eq!(second.stream_revision(), 1);
        assert_eq!(second.commit_sequence(), 1);
        assert_eq!(second.uncommitted_events(), &[make_funds_transferred_event(100.0)]);

        let committed = second.committed_events().await.unwrap().try_collect().await.unwrap();
        assert_eq!(committed.len(), 1);

        second.commit_changes(Uuid::now_v7()).await.expect("retry failed");
        assert_eq!(second.stream_revision(), 2);
        assert_eq!(second.commit_sequence(), 2);
        let committed = second.committed_events().await.unwrap().try_collect().await.unwrap();
        assert_eq!(committed.len(), 2);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_reject_a_commit_id_used_twice(before_each: OptimisticEventStore) {
        let store = before_each;
        let mut stream = store.open_stream("Account", "1").await.unwrap();
        let commit_id = Uuid::now_v7();
        stream.add(make_account_created_event(1, 1000.0));
        stream.commit_changes(commit_id).await.unwrap();

        stream.add(make_funds_transferred_event(10.0));
        let result = stream.commit_changes(commit_id).await;
        assert!(matches!(result, Err(EventStoreError::DuplicateCommit { .. })));
        assert_eq!(stream.uncommitted_events().len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_fail_to_open_a_missing_range(before_each: OptimisticEventStore) {
        let store = before_each;
        let result = store.open_stream_range("Account", "1", 1, 0).await;
        assert!(matches!(result, Err(EventStoreError::StreamNotFound { .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_only_read_events_inside_the_window(before_each: OptimisticEventStore) {
        let store = before_each;
        let mut writer = store.open_stream("Account", "1").await.unwrap();
        writer.add(make_account_created_event(1, 1000.0));
        writer.add(make_funds_transferred_event(1.0));
        writer.add(make_funds_transferred_event(2.0));
        writer.commit_changes(Uuid::now_v7()).await.unwrap();
        writer.add(make_funds_transferred_event(3.0));
        writer.commit_changes(Uuid::now_v7()).await.unwrap();

        let reader = store.open_stream_range("Account", "1", 2, 3).await.unwrap();
        assert_eq!(reader.stream_revision(), 3);
        assert_eq!(reader.commit_sequence(), 1);
        let events = reader.committed_events().await.unwrap().try_collect().await.unwrap();
        assert_eq!(
            events,
            vec![make_funds_transferred_event(1.0), make_funds_transferred_event(2.0)]
        );
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_replay_only_after_a_snapshot(before_each: OptimisticEventStore) {
        let store = before_each;
        let mut writer = store.open_stream("Account", "1").await.unwrap();
        writer.add(make_account_created_event(1, 1000.0));
        writer.commit_changes(Uuid::now_v7()).await.unwrap();
        writer.add(make_funds_transferred_event(-100.0));
        writer.commit_changes(Uuid::now_v7()).await.unwrap();

        let snapshot = Snapshot::new("Account", "1", 1, json!({ "amount": 1000.0 }));
        assert!(store.persistence().add_snapshot(&snapshot).await.unwrap());

        let mut stream = store.open_stream_from_snapshot(&snapshot, 0).await.unwrap();
        assert_eq!(stream.stream_revision(), 2);
        assert_eq!(stream.commit_sequence(), 2);
        let events = stream.committed_events().await.unwrap().try_collect().await.unwrap();
        assert_eq!(events, vec![make_funds_transferred_event(-100.0)]);

        stream.add(make_funds_transferred_event(50.0));
        stream.commit_changes(Uuid::now_v7()).await.unwrap();
        assert_eq!(stream.stream_revision(), 3);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_open_at_a_position_the_store_actually_had() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let store = OptimisticEventStore::new(persistence.clone(), vec![Arc::new(OptimisticPipelineHook::new())]);
        let mut writer = store.open_stream("Account", "1").await.unwrap();
        writer.add(make_account_created_event(1, 1000.0));
        writer.commit_changes(Uuid::now_v7()).await.unwrap();

        persistence.set_delay_append_ms(10);
        writer.add(make_funds_transferred_event(1.0));
        writer.add(make_funds_transferred_event(2.0));
        let (committed, opened) = join!(writer.commit_changes(Uuid::now_v7()), async {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            store.open_stream("Account", "1").await
        });
        committed.unwrap();
        let reader = opened.unwrap();
        let position = (reader.commit_sequence(), reader.stream_revision());
        assert!(
            position == (1, 1) || position == (2, 3),
            "inconsistent position {position:?}"
        );
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_keep_pending_changes_when_storage_is_unavailable() {
        let mut persistence = InMemoryPersistence::new();
        persistence.toggle_offline();
        let store = OptimisticEventStore::new(Arc::new(persistence), vec![]);
        let mut stream = store.create_stream("Account", "1");
        stream.add(make_account_created_event(1, 1000.0));

        let result = stream.commit_changes(Uuid::now_v7()).await;
        assert!(matches!(result, Err(EventStoreError::StorageUnavailable(_))));
        assert_eq!(stream.uncommitted_events().len(), 1);
        assert_eq!(stream.stream_revision(), 0);
        assert_eq!(stream.commit_sequence(), 0);
    }
}
