// Head cache pipeline hook.
//
// Purpose
// - Remember the most recent commit of recently used streams so a stale commit
//   attempt can be rejected before it costs a round-trip to the backing store.
//
// Responsibilities
// - Track heads seen on reads (select) and writes (post_commit).
// - Bound memory: at most `capacity` streams stay resident, the least recently
//   tracked one is evicted first.
// - Forget heads when their bucket is purged or their stream deleted.
//
// Boundaries
// - Best effort only. The backing store stays authoritative; a missing head
//   always lets the attempt through.
// - The map and the recency list live in one HeadCache behind one mutex so
//   they are always updated together.

use crate::application::pipeline_hook::PipelineHook;
use crate::core::commit::{Commit, CommitAttempt};
use crate::core::ports::EventStoreError;
use crate::core::stream_key::StreamKey;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub const MAX_STREAMS_TO_TRACK: usize = 128;

struct Node {
    key: StreamKey,
    // Taken on removal so a freed slot holds no events.
    head: Option<Commit>,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Bounded map from stream to its latest known commit, with least recently
/// tracked eviction. Recency is an intrusive doubly linked list over `nodes`,
/// addressed by slot index; freed slots are reused.
pub struct HeadCache {
    capacity: usize,
    index: HashMap<StreamKey, usize>,
    nodes: Vec<Node>,
    free: Vec<usize>,
    front: Option<usize>,
    back: Option<usize>,
}

impl HeadCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            index: HashMap::with_capacity(capacity + 1),
            nodes: Vec::with_capacity(capacity + 1),
            free: Vec::new(),
            front: None,
            back: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &StreamKey) -> Option<&Commit> {
        self.index
            .get(key)
            .and_then(|&slot| self.nodes[slot].head.as_ref())
    }

    /// Records `commit` as the head of its stream unless a later head is
    /// already known, and marks the stream as most recently used. Returns the
    /// key evicted to stay within capacity, if any.
    pub fn track(&mut self, commit: Commit) -> Option<StreamKey> {
        let key = commit.key();
        if let Some(slot) = self.index.get(&key).copied() {
            let known = &mut self.nodes[slot].head;
            if known.as_ref().is_none_or(|head| commit.stream_revision > head.stream_revision) {
                *known = Some(commit);
            }
            self.unlink(slot);
            self.link_front(slot);
            return None;
        }

        let node = Node {
            key: key.clone(),
            head: Some(commit),
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.link_front(slot);

        if self.index.len() > self.capacity {
            return self.evict_least_recent();
        }
        None
    }

    pub fn remove(&mut self, key: &StreamKey) -> Option<Commit> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        self.free.push(slot);
        self.nodes[slot].head.take()
    }

    pub fn remove_bucket(&mut self, bucket_id: &str) -> usize {
        let keys: Vec<StreamKey> = self
            .index
            .keys()
            .filter(|key| key.is_in_bucket(bucket_id))
            .cloned()
            .collect();
        for key in &keys {
            self.remove(key);
        }
        keys.len()
    }

    pub fn clear(&mut self) {
        self.index.clear();
        self.nodes.clear();
        self.free.clear();
        self.front = None;
        self.back = None;
    }

    /// Tracked keys, most recently used first.
    pub fn keys_by_recency(&self) -> Vec<StreamKey> {
        let mut keys = Vec::with_capacity(self.index.len());
        let mut cursor = self.front;
        while let Some(slot) = cursor {
            keys.push(self.nodes[slot].key.clone());
            cursor = self.nodes[slot].next;
        }
        keys
    }

    fn evict_least_recent(&mut self) -> Option<StreamKey> {
        let slot = self.back?;
        let key = self.nodes[slot].key.clone();
        self.remove(&key);
        Some(key)
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = (self.nodes[slot].prev, self.nodes[slot].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.front = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.back = prev,
        }
        self.nodes[slot].prev = None;
        self.nodes[slot].next = None;
    }

    fn link_front(&mut self, slot: usize) {
        self.nodes[slot].prev = None;
        self.nodes[slot].next = self.front;
        match self.front {
            Some(f) => self.nodes[f].prev = Some(slot),
            None => self.back = Some(slot),
        }
        self.front = Some(slot);
    }
}

pub struct OptimisticPipelineHook {
    heads: Mutex<HeadCache>,
}

impl Default for OptimisticPipelineHook {
    fn default() -> Self {
        Self::new()
    }
}

impl OptimisticPipelineHook {
    pub fn new() -> Self {
        Self::with_capacity(MAX_STREAMS_TO_TRACK)
    }

    pub fn with_capacity(max_streams_to_track: usize) -> Self {
        Self {
            heads: Mutex::new(HeadCache::new(max_streams_to_track)),
        }
    }

    pub async fn track(&self, committed: &Commit) {
        let evicted = {
            let mut heads = self.heads.lock().await;
            heads.track(committed.clone())
        };
        debug!(
            bucket_id = %committed.bucket_id,
            stream_id = %committed.stream_id,
            commit_sequence = committed.commit_sequence,
            "tracking stream head"
        );
        if let Some(key) = evicted {
            debug!(stream = %key, "stream head evicted from tracking");
        }
    }

    pub async fn contains(&self, key: &StreamKey) -> bool {
        self.heads.lock().await.get(key).is_some()
    }

    pub async fn head(&self, key: &StreamKey) -> Option<Commit> {
        self.heads.lock().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.heads.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.heads.lock().await.is_empty()
    }

    pub async fn keys_by_recency(&self) -> Vec<StreamKey> {
        self.heads.lock().await.keys_by_recency()
    }

    /// Drops a head that disagrees with an attempt, so the next attempt is
    /// judged by the backing store alone.
    async fn forget(&self, key: &StreamKey) {
        if self.heads.lock().await.remove(key).is_some() {
            debug!(stream = %key, "untrusted stream head dropped from tracking");
        }
    }
}

#[async_trait]
impl PipelineHook for OptimisticPipelineHook {
    fn name(&self) -> &str {
        "OptimisticPipelineHook"
    }

    async fn select(&self, committed: Commit) -> Commit {
        self.track(&committed).await;
        committed
    }

    async fn pre_commit(&self, attempt: &CommitAttempt) -> Result<bool, EventStoreError> {
        debug!(
            bucket_id = %attempt.bucket_id,
            stream_id = %attempt.stream_id,
            "verifying that no other commits have succeeded on the stream"
        );
        let known_head = {
            let heads = self.heads.lock().await;
            heads
                .get(&attempt.key())
                .map(|head| (head.commit_sequence, head.stream_revision))
        };
        let Some((head_sequence, head_revision)) = known_head else {
            return Ok(true);
        };

        let first_revision = attempt.first_revision();
        if head_sequence >= attempt.commit_sequence || head_revision >= attempt.stream_revision {
            debug!(
                bucket_id = %attempt.bucket_id,
                stream_id = %attempt.stream_id,
                head_sequence,
                head_revision,
                "attempt is behind the known stream head"
            );
            return Err(EventStoreError::ConcurrencyConflict {
                bucket_id: attempt.bucket_id.clone(),
                stream_id: attempt.stream_id.clone(),
                expected_revision: first_revision.saturating_sub(1),
                actual_revision: head_revision,
            });
        }
        if head_sequence + 1 != attempt.commit_sequence {
            self.forget(&attempt.key()).await;
            warn!(
                bucket_id = %attempt.bucket_id,
                stream_id = %attempt.stream_id,
                head_sequence,
                attempt_sequence = attempt.commit_sequence,
                "commit sequence does not follow the known head"
            );
            return Err(EventStoreError::StorageFault(format!(
                "commit sequence {} on stream {} does not follow known head sequence {head_sequence}",
                attempt.commit_sequence,
                attempt.key()
            )));
        }
        if head_revision + 1 != first_revision {
            self.forget(&attempt.key()).await;
            warn!(
                bucket_id = %attempt.bucket_id,
                stream_id = %attempt.stream_id,
                head_revision,
                first_revision,
                "revision range does not abut the known head"
            );
            return Err(EventStoreError::StorageFault(format!(
                "revisions {first_revision}..={} on stream {} do not abut known head revision {head_revision}",
                attempt.stream_revision,
                attempt.key()
            )));
        }

        debug!(
            bucket_id = %attempt.bucket_id,
            stream_id = %attempt.stream_id,
            "no conflicting commits discovered"
        );
        Ok(true)
    }

    async fn post_commit(&self, committed: &Commit) {
        self.track(committed).await;
    }

    async fn on_purge(&self, bucket_id: Option<&str>) {
        let mut heads = self.heads.lock().await;
        match bucket_id {
            None => heads.clear(),
            Some(bucket) => {
                let removed = heads.remove_bucket(bucket);
                debug!(bucket_id = bucket, removed, "purged bucket from head tracking");
            }
        }
    }

    async fn on_delete_stream(&self, bucket_id: &str, stream_id: &str) {
        self.heads
            .lock()
            .await
            .remove(&StreamKey::new(bucket_id, stream_id));
    }
}
