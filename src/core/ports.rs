// Ports define what the core needs from the outside world, without implementing it.
//
// Purpose
// - Describe the backing store, the payload serializer and the commit
//   dispatcher as traits.
//
// Responsibilities
// - Keep sessions, hooks and the store facade independent of any database by
//   coding against these traits.
// - Own the error taxonomy every caller sees.
//
// Boundaries
// - No concrete input or output here. Adapters implement these traits in the adapters layer.
//
// Testing guidance
// - Use the in memory adapters for tests and local development.

use crate::core::commit::{CheckpointToken, Commit, CommitAttempt, Headers};
use crate::core::read_stream::ReadStream;
use crate::core::snapshot::{Snapshot, StreamHead};
use crate::core::stream_key::StreamPosition;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error(
        "concurrency conflict on stream {bucket_id}/{stream_id}: expected revision {expected_revision}, actual {actual_revision}"
    )]
    ConcurrencyConflict {
        bucket_id: String,
        stream_id: String,
        expected_revision: u64,
        actual_revision: u64,
    },

    #[error("duplicate commit {commit_id} on stream {bucket_id}/{stream_id}")]
    DuplicateCommit {
        bucket_id: String,
        stream_id: String,
        commit_id: Uuid,
    },

    #[error("stream {bucket_id}/{stream_id} not found")]
    StreamNotFound { bucket_id: String, stream_id: String },

    #[error("storage fault: {0}")]
    StorageFault(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl EventStoreError {
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

#[derive(Debug, Error)]
pub enum SerializerError {
    #[error("serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("deserialization failed: {0}")]
    Deserialize(#[source] serde_json::Error),
}

impl From<SerializerError> for EventStoreError {
    fn from(err: SerializerError) -> Self {
        EventStoreError::StorageFault(err.to_string())
    }
}

/// Durable, ordered storage for commits and snapshots.
///
/// Implementations must guarantee that two concurrent appends to the same
/// stream at the same commit sequence cannot both succeed, and must assign
/// checkpoint tokens in the order commits become durable.
#[async_trait]
pub trait PersistStreams: Send + Sync {
    async fn append(&self, attempt: &CommitAttempt) -> Result<Commit, EventStoreError>;

    /// Commits whose event range intersects `[min_revision, max_revision]`, ascending.
    async fn read_by_revision(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<ReadStream<Commit>, EventStoreError>;

    async fn read_by_time(
        &self,
        bucket_id: &str,
        start: DateTime<Utc>,
        stop: Option<DateTime<Utc>>,
    ) -> Result<ReadStream<Commit>, EventStoreError>;

    /// Commits persisted strictly after `checkpoint`, across every bucket
    /// unless one is given. `None` reads from the beginning.
    async fn read_by_checkpoint(
        &self,
        bucket_id: Option<&str>,
        checkpoint: Option<&CheckpointToken>,
    ) -> Result<ReadStream<Commit>, EventStoreError>;

    async fn current_stream_revision(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<u64, EventStoreError>;

    async fn current_commit_sequence(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<u64, EventStoreError>;

    /// Sequence and revision from one consistent view of the stream, so a
    /// concurrent append can never split the pair.
    async fn current_position(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<StreamPosition, EventStoreError>;

    async fn undispatched_commits(&self) -> Result<ReadStream<Commit>, EventStoreError>;

    async fn mark_dispatched(&self, commit: &Commit) -> Result<(), EventStoreError>;

    async fn get_snapshot(
        &self,
        bucket_id: &str,
        stream_id: &str,
        max_revision: u64,
    ) -> Result<Option<Snapshot>, EventStoreError>;

    async fn add_snapshot(&self, snapshot: &Snapshot) -> Result<bool, EventStoreError>;

    async fn streams_needing_snapshot(
        &self,
        bucket_id: &str,
        threshold: u64,
    ) -> Result<ReadStream<StreamHead>, EventStoreError>;

    /// Removes every bucket when `bucket_id` is `None`.
    async fn purge(&self, bucket_id: Option<&str>) -> Result<(), EventStoreError>;

    async fn delete_stream(&self, bucket_id: &str, stream_id: &str) -> Result<(), EventStoreError>;
}

/// Turns headers, events and snapshot payloads into bytes and back.
pub trait Serializer: Send + Sync + 'static {
    fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, SerializerError>;

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializerError>;

    fn deserialize_mapping(&self, bytes: &[u8]) -> Result<Headers, SerializerError> {
        self.deserialize(bytes)
    }

    fn deserialize_sequence<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<Vec<T>, SerializerError> {
        self.deserialize(bytes)
    }
}

/// Hands durable commits to whatever projects or publishes them.
#[async_trait]
pub trait CommitDispatcher: Send + Sync {
    async fn dispatch(&self, commit: &Commit) -> anyhow::Result<()>;
}
