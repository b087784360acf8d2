// Pipeline hooks observe every commit attempt that flows through the store facade.
//
// Purpose
// - Let components veto an attempt before it reaches storage, react once it is
//   durable, and watch (or rewrite) commits handed out by reads.
//
// Responsibilities
// - A hook that rejects an attempt must fail with a specific EventStoreError.
//   Returning `Ok(false)` only stops the remaining pre-commit hooks.
//
// Boundaries
// - Hooks are shared between sessions and must tolerate concurrent calls.

use crate::core::commit::{Commit, CommitAttempt};
use crate::core::ports::EventStoreError;
use async_trait::async_trait;

#[async_trait]
pub trait PipelineHook: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Applied to every commit returned by a read through the facade.
    async fn select(&self, committed: Commit) -> Commit;

    async fn pre_commit(&self, attempt: &CommitAttempt) -> Result<bool, EventStoreError>;

    async fn post_commit(&self, committed: &Commit);

    /// `None` means every bucket was purged.
    async fn on_purge(&self, bucket_id: Option<&str>);

    async fn on_delete_stream(&self, bucket_id: &str, stream_id: &str);
}
