use crate::adapters::in_memory::in_memory_dispatcher::InMemoryCommitDispatcher;
use crate::adapters::in_memory::in_memory_persistence::InMemoryPersistence;
use crate::application::dispatch_scheduler::DispatchScheduler;
use crate::application::event_store::OptimisticEventStore;
use crate::application::optimistic_pipeline_hook::OptimisticPipelineHook;
use crate::shell::config::EventStoreConfig;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: OptimisticEventStore,
    pub persistence: Arc<InMemoryPersistence>,
    pub head_cache: Arc<OptimisticPipelineHook>,
    pub dispatcher: Arc<InMemoryCommitDispatcher>,
    pub scheduler: Arc<DispatchScheduler>,
}

impl AppState {
    /// Wires an in-memory backing store, the head cache and a collecting dispatcher.
    pub fn in_memory(config: &EventStoreConfig) -> Self {
        let persistence = Arc::new(InMemoryPersistence::new().with_read_buffer(config.read_buffer));
        let head_cache = Arc::new(OptimisticPipelineHook::with_capacity(config.max_streams_to_track));
        let dispatcher = Arc::new(InMemoryCommitDispatcher::new());
        let scheduler = Arc::new(DispatchScheduler::new(
            persistence.clone(),
            dispatcher.clone(),
            config.dispatch_interval,
        ));
        let store = OptimisticEventStore::new(persistence.clone(), vec![head_cache.clone()])
            .with_read_buffer(config.read_buffer)
            .with_dispatch_scheduler(scheduler.clone());
        Self {
            store,
            persistence,
            head_cache,
            dispatcher,
            scheduler,
        }
    }
}
