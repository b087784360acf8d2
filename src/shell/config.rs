// Runtime configuration read from the process environment.
//
// Purpose
// - Collect the tunables of the composition root in one typed value.
//
// Boundaries
// - Only parsing and validation; nothing here touches storage or spawns work.
//
// Testing guidance
// - Use `from_lookup` with a map instead of mutating the process environment.

use crate::application::dispatch_scheduler::DEFAULT_DISPATCH_INTERVAL;
use crate::application::optimistic_pipeline_hook::MAX_STREAMS_TO_TRACK;
use crate::core::read_stream::DEFAULT_READ_BUFFER;
use std::time::Duration;
use thiserror::Error;

pub const MAX_STREAMS_TO_TRACK_VAR: &str = "EVENT_STORE_MAX_STREAMS_TO_TRACK";
pub const READ_BUFFER_VAR: &str = "EVENT_STORE_READ_BUFFER";
pub const DISPATCH_INTERVAL_MS_VAR: &str = "EVENT_STORE_DISPATCH_INTERVAL_MS";
pub const LOG_VAR: &str = "EVENT_STORE_LOG";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive integer, got {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStoreConfig {
    pub max_streams_to_track: usize,
    pub read_buffer: usize,
    pub dispatch_interval: Duration,
    pub log_filter: String,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self {
            max_streams_to_track: MAX_STREAMS_TO_TRACK,
            read_buffer: DEFAULT_READ_BUFFER,
            dispatch_interval: DEFAULT_DISPATCH_INTERVAL,
            log_filter: "info".to_string(),
        }
    }
}

impl EventStoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Unset variables keep their defaults; set ones must parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_streams_to_track = match lookup(MAX_STREAMS_TO_TRACK_VAR) {
            Some(value) => parse_positive_usize(MAX_STREAMS_TO_TRACK_VAR, &value)?,
            None => defaults.max_streams_to_track,
        };
        let read_buffer = match lookup(READ_BUFFER_VAR) {
            Some(value) => parse_positive_usize(READ_BUFFER_VAR, &value)?,
            None => defaults.read_buffer,
        };
        let dispatch_interval = match lookup(DISPATCH_INTERVAL_MS_VAR) {
            Some(value) => Duration::from_millis(parse_positive(DISPATCH_INTERVAL_MS_VAR, &value)?),
            None => defaults.dispatch_interval,
        };
        let log_filter = lookup(LOG_VAR)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or(defaults.log_filter);

        Ok(Self {
            max_streams_to_track,
            read_buffer,
            dispatch_interval,
            log_filter,
        })
    }
}

fn parse_positive_usize(var: &'static str, value: &str) -> Result<usize, ConfigError> {
    usize::try_from(parse_positive(var, value)?).map_err(|_| invalid(var, value))
}

fn invalid(var: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
    }
}

fn parse_positive(var: &'static str, value: &str) -> Result<u64, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(invalid(var, value)),
    }
}
