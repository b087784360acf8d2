// In memory implementation of the PersistStreams port.
//
// Purpose
// - Support session, hook and facade tests and local development without a database.
//
// Responsibilities
// - Keep commits in global append order and hand out checkpoint tokens at append time.
// - Enforce duplicate detection and single-writer-wins per (bucket, stream, commit sequence).
// - Store headers, events and snapshot payloads as bytes produced by the Serializer.
// - Serve reads lazily: the producer re-enters the lock per commit, using the
//   checkpoint as its cursor, and stops when the consumer goes away.

use crate::adapters::serializers::json_serializer::JsonSerializer;
use crate::core::commit::{CheckpointToken, Commit, CommitAttempt, EventMessage};
use crate::core::ports::{EventStoreError, PersistStreams, Serializer};
use crate::core::read_stream::{DEFAULT_READ_BUFFER, ReadStream};
use crate::core::snapshot::{Snapshot, StreamHead};
use crate::core::stream_key::StreamPosition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

const CHECKPOINT_WIDTH: usize = 20;

struct StoredCommit {
    bucket_id: String,
    stream_id: String,
    stream_revision: u64,
    items: usize,
    commit_id: Uuid,
    commit_sequence: u64,
    commit_timestamp: DateTime<Utc>,
    headers: Vec<u8>,
    events: Vec<u8>,
    checkpoint: u64,
    dispatched: bool,
}

impl StoredCommit {
    fn belongs_to(&self, bucket_id: &str, stream_id: &str) -> bool {
        self.bucket_id == bucket_id && self.stream_id == stream_id
    }

    fn first_revision(&self) -> u64 {
        (self.stream_revision + 1).saturating_sub(self.items as u64)
    }

    fn intersects(&self, min_revision: u64, max_revision: u64) -> bool {
        self.stream_revision >= min_revision && self.first_revision() <= max_revision
    }
}

struct StoredSnapshot {
    bucket_id: String,
    stream_id: String,
    stream_revision: u64,
    payload: Vec<u8>,
}

#[derive(Default)]
struct Storage {
    commits: Vec<StoredCommit>,
    snapshots: Vec<StoredSnapshot>,
    last_checkpoint: u64,
}

impl Storage {
    fn stream_head(&self, bucket_id: &str, stream_id: &str) -> Option<&StoredCommit> {
        self.commits
            .iter()
            .filter(|c| c.belongs_to(bucket_id, stream_id))
            .max_by_key(|c| c.commit_sequence)
    }

    fn window<'a>(
        &'a self,
        bucket_id: &'a str,
        stream_id: &'a str,
        min_revision: u64,
        max_revision: u64,
    ) -> impl Iterator<Item = &'a StoredCommit> + 'a {
        self.commits
            .iter()
            .filter(move |c| c.belongs_to(bucket_id, stream_id) && c.intersects(min_revision, max_revision))
    }
}

pub struct InMemoryPersistence<S: Serializer = JsonSerializer> {
    storage: Arc<RwLock<Storage>>,
    serializer: Arc<S>,
    read_buffer: usize,
    delay_append_ms: AtomicU64,
    is_offline: bool,
}

impl InMemoryPersistence<JsonSerializer> {
    pub fn new() -> Self {
        Self::with_serializer(JsonSerializer::new())
    }
}

impl Default for InMemoryPersistence<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> InMemoryPersistence<S> {
    pub fn with_serializer(serializer: S) -> Self {
        Self {
            storage: Arc::new(RwLock::new(Storage::default())),
            serializer: Arc::new(serializer),
            read_buffer: DEFAULT_READ_BUFFER,
            delay_append_ms: AtomicU64::new(0),
            is_offline: false,
        }
    }

    pub fn with_read_buffer(mut self, read_buffer: usize) -> Self {
        self.read_buffer = read_buffer.max(1);
        self
    }

    pub fn toggle_offline(&mut self) {
        self.is_offline = !self.is_offline;
    }

    /// Delays every append before it takes the write lock, to widen race windows in tests.
    pub fn set_delay_append_ms(&self, delay_ms: u64) {
        self.delay_append_ms.store(delay_ms, Ordering::Relaxed);
    }

    fn ensure_online(&self) -> Result<(), EventStoreError> {
        if self.is_offline {
            return Err(EventStoreError::StorageUnavailable(
                "In-memory persistence offline".into(),
            ));
        }
        Ok(())
    }

    fn stream_commits<F>(&self, after_checkpoint: u64, filter: F) -> ReadStream<Commit>
    where
        F: Fn(&StoredCommit) -> bool + Send + Sync + 'static,
    {
        let storage = self.storage.clone();
        let serializer = self.serializer.clone();
        ReadStream::spawn(self.read_buffer, move |sink| async move {
            let mut cursor = after_checkpoint;
            loop {
                let next = {
                    let guard = storage.read().await;
                    let start = guard.commits.partition_point(|c| c.checkpoint <= cursor);
                    guard.commits[start..]
                        .iter()
                        .find(|c| filter(c))
                        .map(|c| (c.checkpoint, decode_commit(serializer.as_ref(), c)))
                };
                match next {
                    None => break,
                    Some((checkpoint, Ok(commit))) => {
                        cursor = checkpoint;
                        if !sink.send(commit).await {
                            debug!(checkpoint, "commit read cancelled by consumer");
                            break;
                        }
                    }
                    Some((_, Err(err))) => {
                        sink.fail(err).await;
                        break;
                    }
                }
            }
        })
    }
}

fn decode_commit<S: Serializer>(serializer: &S, stored: &StoredCommit) -> Result<Commit, EventStoreError> {
    let headers = serializer.deserialize_mapping(&stored.headers)?;
    let events: Vec<EventMessage> = serializer.deserialize_sequence(&stored.events)?;
    Ok(Commit {
        bucket_id: stored.bucket_id.clone(),
        stream_id: stored.stream_id.clone(),
        stream_revision: stored.stream_revision,
        commit_id: stored.commit_id,
        commit_sequence: stored.commit_sequence,
        commit_timestamp: stored.commit_timestamp,
        headers,
        events: events.into(),
        checkpoint_token: format_checkpoint(stored.checkpoint),
    })
}

fn format_checkpoint(checkpoint: u64) -> CheckpointToken {
    CheckpointToken::new(format!("{checkpoint:0width$}", width = CHECKPOINT_WIDTH))
}

fn parse_checkpoint(token: &CheckpointToken) -> Result<u64, EventStoreError> {
    token
        .as_str()
        .parse()
        .map_err(|_| EventStoreError::StorageFault(format!("unknown checkpoint token '{token}'")))
}

#[async_trait]
impl<S: Serializer> PersistStreams for InMemoryPersistence<S> {
    async fn append(&self, attempt: &CommitAttempt) -> Result<Commit, EventStoreError> {
        self.ensure_online()?;
        let delay_ms = self.delay_append_ms.load(Ordering::Relaxed);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if attempt.events.is_empty() {
            return Err(EventStoreError::StorageFault(format!(
                "commit {} carries no events",
                attempt.commit_id
            )));
        }
        let headers = self.serializer.serialize(&attempt.headers)?;
        let events = self.serializer.serialize(&attempt.events)?;

        let mut guard = self.storage.write().await;
        let (bucket_id, stream_id) = (attempt.bucket_id.as_str(), attempt.stream_id.as_str());
        if guard
            .commits
            .iter()
            .any(|c| c.belongs_to(bucket_id, stream_id) && c.commit_id == attempt.commit_id)
        {
            return Err(EventStoreError::DuplicateCommit {
                bucket_id: bucket_id.to_string(),
                stream_id: stream_id.to_string(),
                commit_id: attempt.commit_id,
            });
        }

        let (head_sequence, head_revision) = guard
            .stream_head(bucket_id, stream_id)
            .map(|head| (head.commit_sequence, head.stream_revision))
            .unwrap_or((0, 0));
        let first_revision = attempt.first_revision();
        if attempt.commit_sequence <= head_sequence || first_revision <= head_revision {
            return Err(EventStoreError::ConcurrencyConflict {
                bucket_id: bucket_id.to_string(),
                stream_id: stream_id.to_string(),
                expected_revision: first_revision.saturating_sub(1),
                actual_revision: head_revision,
            });
        }
        if attempt.commit_sequence != head_sequence + 1 || first_revision != head_revision + 1 {
            return Err(EventStoreError::StorageFault(format!(
                "commit {} on stream {bucket_id}/{stream_id} leaves a gap after sequence {head_sequence}, revision {head_revision}",
                attempt.commit_id
            )));
        }

        guard.last_checkpoint += 1;
        let checkpoint = guard.last_checkpoint;
        guard.commits.push(StoredCommit {
            bucket_id: bucket_id.to_string(),
            stream_id: stream_id.to_string(),
            stream_revision: attempt.stream_revision,
            items: attempt.events.len(),
            commit_id: attempt.commit_id,
            commit_sequence: attempt.commit_sequence,
            commit_timestamp: attempt.commit_timestamp,
            headers,
            events,
            checkpoint,
            dispatched: false,
        });
        debug!(
            bucket_id,
            stream_id,
            commit_sequence = attempt.commit_sequence,
            checkpoint,
            "commit appended"
        );
        Ok(attempt.clone().into_commit(format_checkpoint(checkpoint)))
    }

    async fn read_by_revision(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<ReadStream<Commit>, EventStoreError> {
        self.ensure_online()?;
        let (bucket_id, stream_id) = (bucket_id.to_string(), stream_id.to_string());
        Ok(self.stream_commits(0, move |c| {
            c.belongs_to(&bucket_id, &stream_id) && c.intersects(min_revision, max_revision)
        }))
    }

    async fn read_by_time(
        &self,
        bucket_id: &str,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
    ) -> Result<ReadStream<Commit>, EventStoreError> {
        self.ensure_online()?;
        let bucket_id = bucket_id.to_string();
        Ok(self.stream_commits(0, move |c| {
            c.bucket_id == bucket_id
                && c.commit_timestamp >= start
                && stop.is_none_or(|stop| c.commit_timestamp < stop)
        }))
    }

    async fn read_by_checkpoint(
        &self,
        bucket_id: Option<&str>,
        checkpoint: Option<&CheckpointToken>,
    ) -> Result<ReadStream<Commit>, EventStoreError> {
        self.ensure_online()?;
        let after = checkpoint.map(parse_checkpoint).transpose()?.unwrap_or(0);
        let bucket_id = bucket_id.map(str::to_string);
        Ok(self.stream_commits(after, move |c| {
            bucket_id.as_deref().is_none_or(|bucket| c.bucket_id == bucket)
        }))
    }

    async fn current_stream_revision(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<u64, EventStoreError> {
        let position = self
            .current_position(bucket_id, stream_id, min_revision, max_revision)
            .await?;
        Ok(position.stream_revision)
    }

    async fn current_commit_sequence(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<u64, EventStoreError> {
        let position = self
            .current_position(bucket_id, stream_id, min_revision, max_revision)
            .await?;
        Ok(position.commit_sequence)
    }

    async fn current_position(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<StreamPosition, EventStoreError> {
        self.ensure_online()?;
        let guard = self.storage.read().await;
        Ok(guard
            .window(bucket_id, stream_id, min_revision, max_revision)
            .fold(StreamPosition::default(), |position, c| StreamPosition {
                commit_sequence: position.commit_sequence.max(c.commit_sequence),
                stream_revision: position.stream_revision.max(c.stream_revision.min(max_revision)),
            }))
    }

    async fn undispatched_commits(&self) -> Result<ReadStream<Commit>, EventStoreError> {
        self.ensure_online()?;
        Ok(self.stream_commits(0, |c| !c.dispatched))
    }

    async fn mark_dispatched(&self, commit: &Commit) -> Result<(), EventStoreError> {
        self.ensure_online()?;
        let mut guard = self.storage.write().await;
        if let Some(stored) = guard.commits.iter_mut().find(|c| {
            c.belongs_to(&commit.bucket_id, &commit.stream_id) && c.commit_sequence == commit.commit_sequence
        }) {
            stored.dispatched = true;
        }
        Ok(())
    }

    async fn get_snapshot(
        &self,
        bucket_id: &str,
        stream_id: &str,
        max_revision: u64,
    ) -> Result<Option<Snapshot>, EventStoreError> {
        self.ensure_online()?;
        let guard = self.storage.read().await;
        let Some(stored) = guard
            .snapshots
            .iter()
            .filter(|s| s.bucket_id == bucket_id && s.stream_id == stream_id && s.stream_revision <= max_revision)
            .max_by_key(|s| s.stream_revision)
        else {
            return Ok(None);
        };
        let payload = self.serializer.deserialize(&stored.payload)?;
        Ok(Some(Snapshot::new(
            &stored.bucket_id,
            &stored.stream_id,
            stored.stream_revision,
            payload,
        )))
    }

    async fn add_snapshot(&self, snapshot: &Snapshot) -> Result<bool, EventStoreError> {
        self.ensure_online()?;
        let payload = self.serializer.serialize(&snapshot.payload)?;
        let mut guard = self.storage.write().await;
        let head_revision = guard
            .stream_head(&snapshot.bucket_id, &snapshot.stream_id)
            .map(|head| head.stream_revision)
            .unwrap_or(0);
        let already_taken = guard.snapshots.iter().any(|s| {
            s.bucket_id == snapshot.bucket_id
                && s.stream_id == snapshot.stream_id
                && s.stream_revision == snapshot.stream_revision
        });
        if snapshot.stream_revision == 0 || snapshot.stream_revision > head_revision || already_taken {
            return Ok(false);
        }
        guard.snapshots.push(StoredSnapshot {
            bucket_id: snapshot.bucket_id.clone(),
            stream_id: snapshot.stream_id.clone(),
            stream_revision: snapshot.stream_revision,
            payload,
        });
        Ok(true)
    }

    async fn streams_needing_snapshot(
        &self,
        bucket_id: &str,
        threshold: u64,
    ) -> Result<ReadStream<StreamHead>, EventStoreError> {
        self.ensure_online()?;
        let guard = self.storage.read().await;
        let mut heads: BTreeMap<&str, StreamHead> = BTreeMap::new();
        for commit in guard.commits.iter().filter(|c| c.bucket_id == bucket_id) {
            let head = heads.entry(commit.stream_id.as_str()).or_insert_with(|| StreamHead {
                bucket_id: bucket_id.to_string(),
                stream_id: commit.stream_id.clone(),
                head_revision: 0,
                snapshot_revision: 0,
            });
            head.head_revision = head.head_revision.max(commit.stream_revision);
        }
        for snapshot in guard.snapshots.iter().filter(|s| s.bucket_id == bucket_id) {
            if let Some(head) = heads.get_mut(snapshot.stream_id.as_str()) {
                head.snapshot_revision = head.snapshot_revision.max(snapshot.stream_revision);
            }
        }
        let due = heads
            .into_values()
            .filter(|head| head.replay_cost() >= threshold)
            .collect();
        Ok(ReadStream::from_items(due))
    }

    async fn purge(&self, bucket_id: Option<&str>) -> Result<(), EventStoreError> {
        self.ensure_online()?;
        let mut guard = self.storage.write().await;
        match bucket_id {
            None => {
                guard.commits.clear();
                guard.snapshots.clear();
            }
            Some(bucket) => {
                guard.commits.retain(|c| c.bucket_id != bucket);
                guard.snapshots.retain(|s| s.bucket_id != bucket);
            }
        }
        debug!(bucket_id, "storage purged");
        Ok(())
    }

    async fn delete_stream(&self, bucket_id: &str, stream_id: &str) -> Result<(), EventStoreError> {
        self.ensure_online()?;
        let mut guard = self.storage.write().await;
        guard.commits.retain(|c| !c.belongs_to(bucket_id, stream_id));
        guard
            .snapshots
            .retain(|s| !(s.bucket_id == bucket_id && s.stream_id == stream_id));
        debug!(bucket_id, stream_id, "stream deleted");
        Ok(())
    }
}
