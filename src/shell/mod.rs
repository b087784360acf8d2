// Composition root for the event store.
//
// Responsibilities
// - Read config from environment.
// - Instantiate concrete infrastructure implementations and wire them into the facade.
// - Install the tracing subscriber.
// - Host the account walkthrough the binary runs, so tests can drive it too.

pub mod config;
pub mod state;

use crate::core::commit::EventMessage;
use crate::shell::config::EventStoreConfig;
use crate::shell::state::AppState;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt};
use uuid::Uuid;

/// `RUST_LOG` wins over the configured filter when set.
pub fn init_tracing(config: &EventStoreConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_filter))?;
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoReport {
    pub stream_revision: u64,
    pub commit_sequence: u64,
    pub replayed_events: usize,
    pub dispatched_commits: usize,
}

/// Opens an account, lets a blind session conflict and recover, replays the
/// stream and flushes pending dispatches.
pub async fn run_account_demo(state: &AppState) -> anyhow::Result<DemoReport> {
    let mut stream = state.store.open_stream("Account", "1").await?;
    stream.add_header("Serializer", json!("JsonSerializer"));
    stream.add(EventMessage::new(json!({ "type": "AccountCreated", "id": 1, "amount": 1000.0 })));
    stream.add(EventMessage::new(json!({ "type": "FundsTransferred", "amount": -100.0 })));
    stream.commit_changes(Uuid::now_v7()).await?;
    info!(
        stream_revision = stream.stream_revision(),
        commit_sequence = stream.commit_sequence(),
        "account opened"
    );

    let mut stale = state.store.create_stream("Account", "1");
    stale.add(EventMessage::new(json!({ "type": "FundsTransferred", "amount": 50.0 })));
    if let Err(err) = stale.commit_changes(Uuid::now_v7()).await {
        warn!(error = %err, "stale session conflicted, retrying after refresh");
        stale.commit_changes(Uuid::now_v7()).await?;
    }

    let events = stream.committed_events().await?.try_collect().await?;
    info!(events = events.len(), "replayed account stream");

    state.scheduler.dispatch_pending().await?;
    Ok(DemoReport {
        stream_revision: stale.stream_revision(),
        commit_sequence: stale.commit_sequence(),
        replayed_events: events.len(),
        dispatched_commits: state.dispatcher.dispatched().await.len(),
    })
}
