// Store facade: the single commit and read entry point.
//
// Purpose
// - Compose a backing store with an ordered list of pipeline hooks and hand
//   out stream sessions bound to it.
//
// Responsibilities
// - Run every pre-commit hook before storage, every post-commit hook after a
//   successful append.
// - Pass read results through every hook's select, lazily.
// - Tell hooks about purges and stream deletions after storage applied them.
//
// Boundaries
// - Cheap to clone and safe to share between sessions; all shared state lives
//   behind the backing store and the hooks.

use crate::application::dispatch_scheduler::DispatchScheduler;
use crate::application::event_stream::OptimisticEventStream;
use crate::application::pipeline_hook::PipelineHook;
use crate::core::commit::{Commit, CommitAttempt};
use crate::core::ports::{EventStoreError, PersistStreams};
use crate::core::read_stream::{DEFAULT_READ_BUFFER, ReadStream};
use crate::core::snapshot::Snapshot;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct OptimisticEventStore {
    persistence: Arc<dyn PersistStreams>,
    hooks: Arc<[Arc<dyn PipelineHook>]>,
    scheduler: Option<Arc<DispatchScheduler>>,
    read_buffer: usize,
}

impl OptimisticEventStore {
    pub fn new(persistence: Arc<dyn PersistStreams>, hooks: Vec<Arc<dyn PipelineHook>>) -> Self {
        Self {
            persistence,
            hooks: hooks.into(),
            scheduler: None,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }

    pub fn with_dispatch_scheduler(mut self, scheduler: Arc<DispatchScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn with_read_buffer(mut self, read_buffer: usize) -> Self {
        self.read_buffer = read_buffer.max(1);
        self
    }

    /// The backing store behind this facade.
    pub fn persistence(&self) -> &Arc<dyn PersistStreams> {
        &self.persistence
    }

    pub(crate) fn read_buffer(&self) -> usize {
        self.read_buffer
    }

    pub async fn commit(&self, attempt: CommitAttempt) -> Result<Commit, EventStoreError> {
        for hook in self.hooks.iter() {
            debug!(
                commit_id = %attempt.commit_id,
                hook = hook.name(),
                "pushing attempt to pre-commit hook"
            );
            if !hook.pre_commit(&attempt).await? {
                info!(
                    commit_id = %attempt.commit_id,
                    hook = hook.name(),
                    "pre-commit hook stopped the remaining hooks"
                );
                break;
            }
        }

        info!(
            commit_id = %attempt.commit_id,
            bucket_id = %attempt.bucket_id,
            stream_id = %attempt.stream_id,
            events = attempt.events.len(),
            "committing attempt to the backing store"
        );
        let commit = self.persistence.append(&attempt).await?;

        for hook in self.hooks.iter() {
            debug!(
                commit_id = %commit.commit_id,
                hook = hook.name(),
                "pushing commit to post-commit hook"
            );
            hook.post_commit(&commit).await;
        }
        Ok(commit)
    }

    /// Commits of the stream intersecting `[min_revision, max_revision]`,
    /// each passed through every hook's select.
    pub async fn read_range(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<ReadStream<Commit>, EventStoreError> {
        let mut source = self
            .persistence
            .read_by_revision(bucket_id, stream_id, min_revision, max_revision)
            .await?;
        if self.hooks.is_empty() {
            return Ok(source);
        }
        let hooks = self.hooks.clone();
        Ok(ReadStream::spawn(self.read_buffer, move |sink| async move {
            while let Some(item) = source.next().await {
                let mut commit = match item {
                    Ok(commit) => commit,
                    Err(err) => {
                        sink.fail(err).await;
                        return;
                    }
                };
                for hook in hooks.iter() {
                    commit = hook.select(commit).await;
                }
                if !sink.send(commit).await {
                    source.close();
                    return;
                }
            }
        }))
    }

    /// A session for a stream without asking storage where it stands. Useful
    /// for streams known to be new; commits conflict if they are not.
    pub fn create_stream(&self, bucket_id: &str, stream_id: &str) -> OptimisticEventStream {
        info!(bucket_id, stream_id, "creating stream");
        OptimisticEventStream::create(self.clone(), bucket_id, stream_id)
    }

    pub async fn open_stream(
        &self,
        bucket_id: &str,
        stream_id: &str,
    ) -> Result<OptimisticEventStream, EventStoreError> {
        self.open_stream_range(bucket_id, stream_id, 0, u64::MAX).await
    }

    /// A `max_revision` of zero reads to the end of the stream.
    pub async fn open_stream_range(
        &self,
        bucket_id: &str,
        stream_id: &str,
        min_revision: u64,
        max_revision: u64,
    ) -> Result<OptimisticEventStream, EventStoreError> {
        let max_revision = unbounded_if_zero(max_revision);
        debug!(
            bucket_id,
            stream_id, min_revision, max_revision, "opening stream"
        );
        OptimisticEventStream::open(self.clone(), bucket_id, stream_id, min_revision, max_revision).await
    }

    pub async fn open_stream_from_snapshot(
        &self,
        snapshot: &Snapshot,
        max_revision: u64,
    ) -> Result<OptimisticEventStream, EventStoreError> {
        let max_revision = unbounded_if_zero(max_revision);
        debug!(
            bucket_id = %snapshot.bucket_id,
            stream_id = %snapshot.stream_id,
            snapshot_revision = snapshot.stream_revision,
            max_revision,
            "opening stream from snapshot"
        );
        OptimisticEventStream::from_snapshot(self.clone(), snapshot, max_revision).await
    }

    /// Purges one bucket, or everything when `bucket_id` is `None`.
    pub async fn purge(&self, bucket_id: Option<&str>) -> Result<(), EventStoreError> {
        info!(bucket_id, "purging storage");
        self.persistence.purge(bucket_id).await?;
        for hook in self.hooks.iter() {
            hook.on_purge(bucket_id).await;
        }
        Ok(())
    }

    pub async fn delete_stream(&self, bucket_id: &str, stream_id: &str) -> Result<(), EventStoreError> {
        info!(bucket_id, stream_id, "deleting stream");
        self.persistence.delete_stream(bucket_id, stream_id).await?;
        for hook in self.hooks.iter() {
            hook.on_delete_stream(bucket_id, stream_id).await;
        }
        Ok(())
    }

    /// Starts the dispatch scheduler when one is configured. Calling it again is a no-op.
    pub fn start_dispatch_scheduler(&self) {
        match &self.scheduler {
            Some(scheduler) => scheduler.start(),
            None => debug!("no dispatch scheduler configured"),
        }
    }
}

fn unbounded_if_zero(max_revision: u64) -> u64 {
    if max_revision == 0 { u64::MAX } else { max_revision }
}
