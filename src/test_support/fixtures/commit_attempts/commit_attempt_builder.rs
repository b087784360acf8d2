// Shared test fixture for CommitAttempt values.
// Defaults to the first commit of stream ("Account", "1") carrying one event.

use crate::core::commit::{Commit, CommitAttempt, EventMessage, Headers};
use crate::test_support::fixtures::events::account_events::make_account_created_event;
use chrono::{DateTime, Utc};
use uuid::Uuid;

pub struct CommitAttemptBuilder {
    bucket_id: String,
    stream_id: String,
    previous_revision: u64,
    previous_sequence: u64,
    stream_revision: Option<u64>,
    commit_sequence: Option<u64>,
    commit_id: Uuid,
    commit_timestamp: DateTime<Utc>,
    headers: Headers,
    events: Vec<EventMessage>,
}

impl Default for CommitAttemptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl CommitAttemptBuilder {
    pub fn new() -> Self {
        Self {
            bucket_id: "Account".to_string(),
            stream_id: "1".to_string(),
            previous_revision: 0,
            previous_sequence: 0,
            stream_revision: None,
            commit_sequence: None,
            commit_id: Uuid::now_v7(),
            commit_timestamp: Utc::now(),
            headers: Headers::new(),
            events: vec![make_account_created_event(1, 1000.0)],
        }
    }

    pub fn bucket_id(mut self, v: impl Into<String>) -> Self {
        self.bucket_id = v.into();
        self
    }

    pub fn stream_id(mut self, v: impl Into<String>) -> Self {
        self.stream_id = v.into();
        self
    }

    /// Positions the attempt right after `commit` on the same stream.
    pub fn after(mut self, commit: &Commit) -> Self {
        self.bucket_id = commit.bucket_id.clone();
        self.stream_id = commit.stream_id.clone();
        self.previous_revision = commit.stream_revision;
        self.previous_sequence = commit.commit_sequence;
        self
    }

    pub fn stream_revision(mut self, v: u64) -> Self {
        self.stream_revision = Some(v);
        self
    }

    pub fn commit_sequence(mut self, v: u64) -> Self {
        self.commit_sequence = Some(v);
        self
    }

    pub fn commit_id(mut self, v: Uuid) -> Self {
        self.commit_id = v;
        self
    }

    pub fn commit_timestamp(mut self, v: DateTime<Utc>) -> Self {
        self.commit_timestamp = v;
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    pub fn events(mut self, v: Vec<EventMessage>) -> Self {
        self.events = v;
        self
    }

    pub fn build(self) -> CommitAttempt {
        let stream_revision = self
            .stream_revision
            .unwrap_or(self.previous_revision + self.events.len() as u64);
        let commit_sequence = self.commit_sequence.unwrap_or(self.previous_sequence + 1);
        CommitAttempt::new(
            self.bucket_id,
            self.stream_id,
            stream_revision,
            self.commit_id,
            commit_sequence,
            self.commit_timestamp,
            self.headers,
            self.events,
        )
    }
}
