// Commit data model shared by sessions, hooks and backing stores.
//
// Purpose
// - Describe a single event (EventMessage), a proposed batch (CommitAttempt)
//   and a durable batch (Commit).
//
// Boundaries
// - Plain data. No input or output, no locking.
// - Payloads and header values are opaque serde_json values; the core never
//   inspects them.

use crate::core::stream_key::StreamKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub type Headers = HashMap<String, serde_json::Value>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub headers: Headers,
    pub body: serde_json::Value,
}

impl EventMessage {
    pub fn new(body: serde_json::Value) -> Self {
        Self {
            headers: Headers::new(),
            body,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// An event without a body carries nothing worth persisting.
    pub fn has_body(&self) -> bool {
        !self.body.is_null()
    }
}

/// A batch of events proposed for persistence. Built fresh for every commit
/// and never mutated afterwards.
///
/// `stream_revision` is the revision of the last event in the batch and
/// `commit_sequence` is the sequence the batch would occupy once durable.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitAttempt {
    pub bucket_id: String,
    pub stream_id: String,
    pub stream_revision: u64,
    pub commit_id: Uuid,
    pub commit_sequence: u64,
    pub commit_timestamp: DateTime<Utc>,
    pub headers: Headers,
    pub events: Vec<EventMessage>,
}

impl CommitAttempt {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bucket_id: impl Into<String>,
        stream_id: impl Into<String>,
        stream_revision: u64,
        commit_id: Uuid,
        commit_sequence: u64,
        commit_timestamp: DateTime<Utc>,
        headers: Headers,
        events: Vec<EventMessage>,
    ) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            stream_id: stream_id.into(),
            stream_revision,
            commit_id,
            commit_sequence,
            commit_timestamp,
            headers,
            events,
        }
    }

    pub fn key(&self) -> StreamKey {
        StreamKey::new(&self.bucket_id, &self.stream_id)
    }

    /// Revision of the first event in the batch.
    pub fn first_revision(&self) -> u64 {
        first_revision(self.stream_revision, self.events.len())
    }

    /// Turns the attempt into a durable commit once the backing store has
    /// assigned its checkpoint.
    pub fn into_commit(self, checkpoint_token: CheckpointToken) -> Commit {
        Commit {
            bucket_id: self.bucket_id,
            stream_id: self.stream_id,
            stream_revision: self.stream_revision,
            commit_id: self.commit_id,
            commit_sequence: self.commit_sequence,
            commit_timestamp: self.commit_timestamp,
            headers: self.headers,
            events: self.events.into(),
            checkpoint_token,
        }
    }
}

/// A batch of events durably persisted by a backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    pub bucket_id: String,
    pub stream_id: String,
    pub stream_revision: u64,
    pub commit_id: Uuid,
    pub commit_sequence: u64,
    pub commit_timestamp: DateTime<Utc>,
    pub headers: Headers,
    pub events: Arc<[EventMessage]>,
    pub checkpoint_token: CheckpointToken,
}

impl Commit {
    pub fn key(&self) -> StreamKey {
        StreamKey::new(&self.bucket_id, &self.stream_id)
    }

    pub fn first_revision(&self) -> u64 {
        first_revision(self.stream_revision, self.events.len())
    }

    /// Pairs every event with the stream revision it occupies.
    pub fn revisioned_events(&self) -> impl Iterator<Item = (u64, &EventMessage)> {
        let first = self.first_revision();
        self.events
            .iter()
            .enumerate()
            .map(move |(offset, event)| (first + offset as u64, event))
    }
}

fn first_revision(stream_revision: u64, event_count: usize) -> u64 {
    (stream_revision + 1).saturating_sub(event_count as u64)
}

/// Opaque, totally ordered cursor assigned by the backing store at append
/// time. The core compares tokens but never parses them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CheckpointToken(String);

impl CheckpointToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CheckpointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
