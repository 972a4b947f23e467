/*!
 * System Limits and Constants
 *
 * Centralized location for sizes, defaults and environment variable names.
 */

// =============================================================================
// FRONTEND PREALLOCATED STORAGE
// =============================================================================

/// Inline storage embedded in every frontend schedule operation (128 bytes)
/// [PERF] Large enough for the default backend's schedule operation on 64-bit targets
pub const SCHEDULE_STORAGE_SIZE: usize = 128;

/// Inline storage embedded in every frontend bulk operation (256 bytes)
/// [PERF] Large enough for the default backend's bulk operation on 64-bit targets
pub const BULK_STORAGE_SIZE: usize = 256;

/// Alignment of the frontend inline storage
pub const STORAGE_ALIGN: usize = 16;

// =============================================================================
// THREAD POOL
// =============================================================================

/// Default worker thread name prefix
pub const DEFAULT_THREAD_NAME: &str = "system-context";

// =============================================================================
// ENVIRONMENT
// =============================================================================

/// Number of worker threads for the default backend
pub const ENV_THREADS: &str = "SYSTEM_CONTEXT_THREADS";

/// Worker thread name prefix for the default backend
pub const ENV_THREAD_NAME: &str = "SYSTEM_CONTEXT_THREAD_NAME";

/// Enable JSON log output
pub const ENV_TRACE_JSON: &str = "SYSTEM_CONTEXT_TRACE_JSON";
