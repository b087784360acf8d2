// Dispatch scheduler: hands durable commits to a dispatcher until each is acknowledged.
//
// Purpose
// - Move every undispatched commit from the backing store to a CommitDispatcher
//   and mark it dispatched once delivery succeeded.
//
// Responsibilities
// - Poll the backing store on a fixed interval from a background task.
// - A failed delivery ends the round; the commit is picked up again next tick.
//
// Boundaries
// - At-least-once: a crash between dispatch and mark delivers the commit again.
// - Once stopped, a scheduler stays stopped.

use crate::core::ports::{CommitDispatcher, PersistStreams};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

pub const DEFAULT_DISPATCH_INTERVAL: Duration = Duration::from_millis(1000);

pub struct DispatchScheduler {
    persistence: Arc<dyn PersistStreams>,
    dispatcher: Arc<dyn CommitDispatcher>,
    interval: Duration,
    started: AtomicBool,
    shutdown: watch::Sender<bool>,
}

impl DispatchScheduler {
    pub fn new(
        persistence: Arc<dyn PersistStreams>,
        dispatcher: Arc<dyn CommitDispatcher>,
        interval: Duration,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            persistence,
            dispatcher,
            interval: interval.max(Duration::from_millis(1)),
            started: AtomicBool::new(false),
            shutdown,
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Spawns the polling worker on the current tokio runtime. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::AcqRel) {
            debug!("dispatch scheduler already started");
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no tokio runtime available, dispatch scheduler not started");
            self.started.store(false, Ordering::Release);
            return;
        };

        let persistence = self.persistence.clone();
        let dispatcher = self.dispatcher.clone();
        let interval = self.interval;
        let mut shutdown = self.shutdown.subscribe();
        info!(interval_ms = interval.as_millis() as u64, "starting dispatch scheduler");

        runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = dispatch_round(persistence.as_ref(), dispatcher.as_ref()).await {
                            warn!(error = %err, "dispatch round failed, retrying next tick");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow_and_update() {
                            break;
                        }
                    }
                }
            }
            info!("dispatch scheduler stopped");
        });
    }

    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Runs one dispatch round right away and returns how many commits were dispatched.
    pub async fn dispatch_pending(&self) -> anyhow::Result<usize> {
        dispatch_round(self.persistence.as_ref(), self.dispatcher.as_ref()).await
    }
}

impl Drop for DispatchScheduler {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

async fn dispatch_round(
    persistence: &dyn PersistStreams,
    dispatcher: &dyn CommitDispatcher,
) -> anyhow::Result<usize> {
    let mut pending = persistence.undispatched_commits().await?;
    let mut dispatched = 0;
    while let Some(commit) = pending.next().await {
        let commit = commit?;
        dispatcher.dispatch(&commit).await?;
        persistence.mark_dispatched(&commit).await?;
        debug!(
            commit_id = %commit.commit_id,
            checkpoint = %commit.checkpoint_token,
            "commit dispatched"
        );
        dispatched += 1;
    }
    if dispatched > 0 {
        info!(dispatched, "dispatch round complete");
    }
    Ok(dispatched)
}
