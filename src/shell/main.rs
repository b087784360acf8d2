use event_store::shell::config::EventStoreConfig;
use event_store::shell::state::AppState;
use event_store::shell::{init_tracing, run_account_demo};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = EventStoreConfig::from_env()?;
    init_tracing(&config)?;

    // In-memory deps for now
    let state = AppState::in_memory(&config);
    state.store.start_dispatch_scheduler();

    let report = run_account_demo(&state).await?;
    info!(
        stream_revision = report.stream_revision,
        commit_sequence = report.commit_sequence,
        replayed_events = report.replayed_events,
        dispatched_commits = report.dispatched_commits,
        "account demo finished"
    );
    state.scheduler.stop();
    Ok(())
}
