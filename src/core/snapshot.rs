// Snapshot data model.
//
// Purpose
// - A Snapshot is the materialized state of a stream at a given revision and
//   lets a session skip replaying everything before it.
// - A StreamHead reports how far a stream has moved past its latest snapshot.
//
// Boundaries
// - Deciding when to take a snapshot is left to the caller.

use crate::core::stream_key::StreamKey;

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub bucket_id: String,
    pub stream_id: String,
    pub stream_revision: u64,
    pub payload: serde_json::Value,
}

impl Snapshot {
    pub fn new(
        bucket_id: impl Into<String>,
        stream_id: impl Into<String>,
        stream_revision: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            bucket_id: bucket_id.into(),
            stream_id: stream_id.into(),
            stream_revision,
            payload,
        }
    }

    pub fn key(&self) -> StreamKey {
        StreamKey::new(&self.bucket_id, &self.stream_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHead {
    pub bucket_id: String,
    pub stream_id: String,
    pub head_revision: u64,
    pub snapshot_revision: u64,
}

impl StreamHead {
    /// Number of events a replay would have to apply on top of the snapshot.
    pub fn replay_cost(&self) -> u64 {
        self.head_revision.saturating_sub(self.snapshot_revision)
    }
}
