/*!
 * System Context Library
 *
 * Process-wide, replaceable scheduler for work that should run on a
 * system-managed thread pool.
 *
 * - `replaceability`: the object-safe boundary between callers and backends
 * - `backend`: default thread-pool backend, operation placement, registry
 * - `context`: caller-facing scheduler and senders
 * - `exec` / `pool`: sender/receiver vocabulary and the thread pool behind the
 *   default backend
 */

pub mod backend;
pub mod context;
pub mod core;
pub mod exec;
pub mod monitoring;
pub mod pool;
pub mod replaceability;

// Re-exports
pub use backend::{
    query_system_context, set_system_context_backend, set_system_context_backend_factory,
    BackendFactory, BackendStats, InstanceRegistry, Placement, ThreadPoolBackend,
};
pub use context::{get_system_scheduler, ForwardProgress, SystemContextScheduler};
pub use crate::core::{Guid, ScheduleError, ScheduleResult, Storage};
pub use monitoring::init_tracing;
pub use pool::{PoolConfig, StaticThreadPool};
pub use replaceability::{
    BulkItemReceiver, Capability, PropertySlot, Receiver, ReceiverExt, RuntimeProperty,
    SystemScheduler,
};
