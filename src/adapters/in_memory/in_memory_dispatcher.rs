// In memory implementation of the CommitDispatcher port.
//
// Purpose
// - Support tests and development for verifying that durable commits get dispatched.
//
// Responsibilities
// - Collect dispatched commits in a list for inspection.
// - Deliveries are at least once; a commit id seen before on the same stream is
//   acknowledged without being recorded again.

use crate::core::commit::Commit;
use crate::core::ports::CommitDispatcher;
use crate::core::stream_key::StreamKey;
use anyhow::bail;
use std::collections::HashSet;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryCommitDispatcher {
    pub rows: Mutex<Vec<Commit>>,
    seen: Mutex<HashSet<(StreamKey, Uuid)>>,
    is_offline: bool,
}

impl InMemoryCommitDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn toggle_offline(&mut self) {
        self.is_offline = !self.is_offline;
    }

    pub async fn dispatched(&self) -> Vec<Commit> {
        self.rows.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl CommitDispatcher for InMemoryCommitDispatcher {
    async fn dispatch(&self, commit: &Commit) -> anyhow::Result<()> {
        if self.is_offline {
            bail!("Commit dispatcher offline");
        }
        if !self.seen.lock().await.insert((commit.key(), commit.commit_id)) {
            return Ok(());
        }
        self.rows.lock().await.push(commit.clone());
        Ok(())
    }
}

#[cfg(test)]
mod in_memory_commit_dispatcher_tests {
    use super::*;
    use crate::core::commit::CheckpointToken;
    use crate::test_support::fixtures::commit_attempts::commit_attempt_builder::CommitAttemptBuilder;
    use rstest::{fixture, rstest};

    #[fixture]
    fn before_each() -> Commit {
        CommitAttemptBuilder::new()
            .build()
            .into_commit(CheckpointToken::new("00000000000000000001"))
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_record_the_commit(before_each: Commit) {
        let dispatcher = InMemoryCommitDispatcher::new();
        dispatcher.dispatch(&before_each).await.expect("dispatch failed");
        assert_eq!(dispatcher.dispatched().await, vec![before_each]);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_record_a_redelivered_commit_once(before_each: Commit) {
        let dispatcher = InMemoryCommitDispatcher::new();
        dispatcher.dispatch(&before_each).await.unwrap();
        let redelivery = dispatcher.dispatch(&before_each).await;
        assert!(redelivery.is_ok());
        assert_eq!(dispatcher.dispatched().await.len(), 1);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_record_commits_of_different_streams_sharing_an_id(before_each: Commit) {
        let dispatcher = InMemoryCommitDispatcher::new();
        let sibling = CommitAttemptBuilder::new()
            .stream_id("2")
            .commit_id(before_each.commit_id)
            .build()
            .into_commit(CheckpointToken::new("00000000000000000002"));
        dispatcher.dispatch(&before_each).await.unwrap();
        dispatcher.dispatch(&sibling).await.unwrap();
        let streams: Vec<String> = dispatcher
            .dispatched()
            .await
            .into_iter()
            .map(|c| c.stream_id)
            .collect();
        assert_eq!(streams, vec!["1".to_string(), "2".to_string()]);
    }

    #[rstest]
    #[tokio::test]
    async fn it_should_fail_if_the_dispatcher_is_offline(before_each: Commit) {
        let mut dispatcher = InMemoryCommitDispatcher::new();
        dispatcher.toggle_offline();
        let result = dispatcher.dispatch(&before_each).await;
        assert!(result.unwrap_err().to_string().contains("Commit dispatcher offline"));
        assert!(dispatcher.dispatched().await.is_empty());
    }
}
