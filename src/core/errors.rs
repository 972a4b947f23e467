/*!
 * Error Types
 * Scheduling errors with thiserror, miette and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;

/// Result type for scheduling operations
pub type ScheduleResult<T> = Result<T, ScheduleError>;

/// Errors delivered to receivers or returned by the registry and pool
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ScheduleError {
    #[error("Scheduled work panicked: {0}")]
    #[diagnostic(
        code(schedule::panicked),
        help("The work item or one of its callbacks panicked. The panic was captured at the scheduler boundary.")
    )]
    Panicked(String),

    #[error("Thread pool is shut down")]
    #[diagnostic(
        code(schedule::pool_shutdown),
        help("The backend that owned this pool was dropped. Obtain a fresh scheduler from the registry.")
    )]
    PoolShutdown,

    #[error("Failed to spawn worker thread: {0}")]
    #[diagnostic(
        code(schedule::spawn_failed),
        help("Check thread limits (ulimit -u) and available memory.")
    )]
    SpawnFailed(String),

    #[error("Backend factory failed: {0}")]
    #[diagnostic(
        code(schedule::factory_failed),
        help("The installed backend factory could not construct a scheduler.")
    )]
    FactoryFailed(String),

    #[error("Invalid configuration: {0}")]
    #[diagnostic(
        code(schedule::invalid_config),
        help("Check SYSTEM_CONTEXT_* environment variables.")
    )]
    InvalidConfig(String),
}

impl ScheduleError {
    /// Convert a caught unwind payload into an error
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        ScheduleError::Panicked(message)
    }
}
