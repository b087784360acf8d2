// Crate entry point. Re-export modules so tests and binaries can import them easily.
//
// Responsibilities
// - Only declare and expose modules. No business logic here.
//
// How it is used
// - The demo binary and the integration tests under tests/ reach the store
//   facade, sessions and in-memory adapters through these paths.

pub mod core {
    pub mod commit;
    pub mod ports;
    pub mod read_stream;
    pub mod snapshot;
    pub mod stream_key;
}

pub mod application {
    pub mod dispatch_scheduler;
    pub mod event_store;
    pub mod event_stream;
    pub mod optimistic_pipeline_hook;
    pub mod pipeline_hook;
}

pub mod adapters {
    pub mod in_memory {
        pub mod in_memory_dispatcher;
        pub mod in_memory_persistence;
    }
    pub mod serializers {
        pub mod json_serializer;
    }
}

pub mod shell;

#[cfg(test)]
pub mod test_support {
    pub mod fixtures {
        pub mod events {
            pub mod account_events;
        }
        pub mod commit_attempts {
            pub mod commit_attempt_builder;
        }
    }
}
