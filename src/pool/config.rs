/*!
 * Thread Pool Configuration
 *
 * Defaults, presets and environment overrides for worker pools
 */

use crate::core::limits::{DEFAULT_THREAD_NAME, ENV_THREADS, ENV_THREAD_NAME};
use crate::core::{ScheduleError, ScheduleResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Thread pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads
    pub threads: usize,
    /// Worker thread name prefix; workers are named `<prefix>-<index>`
    pub thread_name: String,
    /// Worker stack size in bytes (platform default if unset)
    pub stack_size: Option<usize>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            threads: num_cpus::get().max(1),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
        }
    }
}

impl PoolConfig {
    /// One worker; completions are serialized
    pub fn single_threaded() -> Self {
        Self {
            threads: 1,
            ..Self::default()
        }
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    /// Defaults overlaid with `SYSTEM_CONTEXT_*` environment variables
    pub fn from_env() -> ScheduleResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`, keyed by environment variable name
    pub fn from_lookup<F>(lookup: F) -> ScheduleResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_THREADS) {
            config.threads = parse_value(ENV_THREADS, &value)?;
        }
        if let Some(value) = lookup(ENV_THREAD_NAME) {
            config.thread_name = value;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ScheduleResult<()> {
        if self.threads == 0 {
            return Err(ScheduleError::InvalidConfig(
                "thread pool needs at least one worker".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> ScheduleResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ScheduleError::InvalidConfig(format!("{key}={value:?} is not a valid number")))
}
