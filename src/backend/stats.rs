/*!
 * Lock-Free Backend Statistics
 * Atomic counters updated on every schedule call
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Where an operation state was placed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Constructed inside caller-provided storage
    Inline,
    /// Caller storage was missing or too small; heap-allocated
    Heap,
}

/// Point-in-time copy of [`AtomicBackendStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStats {
    pub scheduled: u64,
    pub bulk_scheduled: u64,
    pub inline_placements: u64,
    pub heap_placements: u64,
    pub boundary_errors: u64,
}

/// Atomic backend statistics
///
/// # Performance
/// - Cache-line aligned to keep counters off the pool's hot lines
/// - Relaxed ordering; snapshots are not mutually consistent
#[repr(C, align(64))]
pub struct AtomicBackendStats {
    scheduled: AtomicU64,
    bulk_scheduled: AtomicU64,
    inline_placements: AtomicU64,
    heap_placements: AtomicU64,
    boundary_errors: AtomicU64,
}

impl AtomicBackendStats {
    #[inline]
    pub const fn new() -> Self {
        Self {
            scheduled: AtomicU64::new(0),
            bulk_scheduled: AtomicU64::new(0),
            inline_placements: AtomicU64::new(0),
            heap_placements: AtomicU64::new(0),
            boundary_errors: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn inc_scheduled(&self) {
        self.scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_bulk_scheduled(&self) {
        self.bulk_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_placement(&self, placement: Placement) {
        match placement {
            Placement::Inline => self.inline_placements.fetch_add(1, Ordering::Relaxed),
            Placement::Heap => self.heap_placements.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// A fault was caught at the scheduling boundary and turned into `on_error`
    #[inline(always)]
    pub fn inc_boundary_errors(&self) {
        self.boundary_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn snapshot(&self) -> BackendStats {
        BackendStats {
            scheduled: self.scheduled.load(Ordering::Relaxed),
            bulk_scheduled: self.bulk_scheduled.load(Ordering::Relaxed),
            inline_placements: self.inline_placements.load(Ordering::Relaxed),
            heap_placements: self.heap_placements.load(Ordering::Relaxed),
            boundary_errors: self.boundary_errors.load(Ordering::Relaxed),
        }
    }
}

impl Default for AtomicBackendStats {
    fn default() -> Self {
        Self::new()
    }
}
