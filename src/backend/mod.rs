/*!
 * Scheduler Backends
 *
 * The default [`SystemScheduler`] implementation and the registry that decides
 * which backend the process uses.
 *
 * # Default Backend
 *
 * [`ThreadPoolBackend`] owns a [`StaticThreadPool`] and adapts its senders to the
 * boundary protocol:
 * - `schedule` connects a pool schedule sender, `bulk_schedule` a pool bulk
 *   sender whose per-index function calls `on_item`
 * - operation states go into caller storage when they fit (see [`operation`])
 * - a panic while connecting or starting becomes `on_error` on the receiver and
 *   never unwinds past the boundary
 */

pub mod operation;
pub mod registry;
mod stats;

pub use registry::{
    query_system_context, set_system_context_backend, set_system_context_backend_factory,
    BackendFactory, InstanceRegistry, RegisteredCapability,
};
pub use stats::{AtomicBackendStats, BackendStats, Placement};

use crate::core::{ScheduleError, ScheduleResult, Storage};
use crate::exec::{OperationState, Sender};
use crate::pool::{BulkOperation, PoolConfig, PoolScheduler, ScheduleOperation, StaticThreadPool};
use crate::replaceability::{BulkItemReceiver, Receiver, SystemScheduler};
use operation::{prepare, Completion, Prepared};
use std::alloc::Layout;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::NonNull;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name of the factory installed when nothing else was registered
pub const DEFAULT_FACTORY_NAME: &str = "thread-pool";

/// Bulk receiver pointer shared by every runner of one bulk operation
struct ItemSink(NonNull<dyn BulkItemReceiver>);

// SAFETY: boundary receivers are `Send + Sync` and outlive the operation.
unsafe impl Send for ItemSink {}
unsafe impl Sync for ItemSink {}

impl ItemSink {
    #[inline]
    fn get(&self) -> &dyn BulkItemReceiver {
        // SAFETY: the receiver stays valid until its terminal signal, which the
        // pool issues only after every item call has returned.
        unsafe { self.0.as_ref() }
    }
}

fn forward_items(sink: ItemSink) -> impl Fn(u32) + Send + Sync + 'static {
    move |index| sink.get().on_item(index)
}

fn bulk_operation_layout<F>(_items: &F) -> Layout
where
    F: Fn(u32) + Send + Sync + 'static,
{
    Layout::new::<BulkOperation<F, Completion<dyn BulkItemReceiver>>>()
}

/// Stand-in receiver used only to name the bulk operation type
struct NoItems;

impl Receiver for NoItems {
    fn on_value(&self) {}
    fn on_error(&self, _error: ScheduleError) {}
    fn on_stopped(&self) {}
}

impl BulkItemReceiver for NoItems {
    fn on_item(&self, _index: u32) {}
}

/// [`SystemScheduler`] backed by a [`StaticThreadPool`]
pub struct ThreadPoolBackend {
    pool: StaticThreadPool,
    scheduler: PoolScheduler,
    stats: AtomicBackendStats,
}

impl ThreadPoolBackend {
    pub fn new(config: PoolConfig) -> ScheduleResult<Self> {
        let pool = StaticThreadPool::new(config)?;
        let scheduler = pool.scheduler();
        info!(threads = pool.num_threads(), "Thread pool backend ready");
        Ok(Self {
            pool,
            scheduler,
            stats: AtomicBackendStats::new(),
        })
    }

    pub fn with_defaults() -> ScheduleResult<Self> {
        Self::new(PoolConfig::default())
    }

    /// Backend configured from `SYSTEM_CONTEXT_*` environment variables
    pub fn from_env() -> ScheduleResult<Self> {
        Self::new(PoolConfig::from_env()?)
    }

    /// Factory producing [`ThreadPoolBackend::from_env`] instances
    pub fn factory() -> BackendFactory<dyn SystemScheduler> {
        BackendFactory::new(DEFAULT_FACTORY_NAME, || {
            let backend: Arc<dyn SystemScheduler> = Arc::new(ThreadPoolBackend::from_env()?);
            Ok(backend)
        })
    }

    pub fn pool(&self) -> &StaticThreadPool {
        &self.pool
    }

    pub fn stats(&self) -> BackendStats {
        self.stats.snapshot()
    }

    /// Storage a caller must provide for `schedule` to avoid allocating
    pub fn schedule_layout() -> Layout {
        Layout::new::<ScheduleOperation<Completion<dyn Receiver>>>()
    }

    /// Storage a caller must provide for `bulk_schedule` to avoid allocating
    pub fn bulk_layout() -> Layout {
        let sink = ItemSink(NonNull::<NoItems>::dangling());
        bulk_operation_layout(&forward_items(sink))
    }

    /// Place `sender`'s operation and start it, catching faults on the way
    ///
    /// # Safety
    ///
    /// `storage` and `receiver` must satisfy the [`SystemScheduler`] contract.
    unsafe fn submit<S, Rx>(&self, sender: S, storage: Storage, receiver: NonNull<Rx>)
    where
        S: Sender,
        Rx: ?Sized + Receiver + 'static,
    {
        let prepared = panic::catch_unwind(AssertUnwindSafe(|| prepare(sender, storage, receiver)));
        self.launch(prepared, receiver);
    }

    /// Start a prepared operation, or report the fault that stopped it
    ///
    /// # Safety
    ///
    /// `receiver` must be valid until signalled.
    unsafe fn launch<T, Rx>(
        &self,
        prepared: std::thread::Result<Prepared<T>>,
        receiver: NonNull<Rx>,
    ) where
        T: OperationState,
        Rx: ?Sized + Receiver,
    {
        match prepared {
            Ok(prepared) => {
                self.stats.record_placement(prepared.placement());
                // Any panic past this point comes from a receiver signal that was
                // already delivered; signalling again would break exactly-once.
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| prepared.start())) {
                    error!(
                        error = %ScheduleError::from_panic(payload),
                        "Receiver panicked during synchronous completion"
                    );
                }
            }
            Err(payload) => {
                let error = ScheduleError::from_panic(payload);
                warn!(error = %error, "Failed to schedule work, reporting to receiver");
                self.stats.inc_boundary_errors();
                receiver.as_ref().on_error(error);
            }
        }
    }
}

impl SystemScheduler for ThreadPoolBackend {
    unsafe fn schedule(&self, storage: Storage, receiver: NonNull<dyn Receiver>) {
        self.stats.inc_scheduled();
        self.submit(self.scheduler.schedule(), storage, receiver);
    }

    unsafe fn bulk_schedule(
        &self,
        count: u32,
        storage: Storage,
        receiver: NonNull<dyn BulkItemReceiver>,
    ) {
        self.stats.inc_bulk_scheduled();
        let items = forward_items(ItemSink(receiver));
        self.submit(self.scheduler.bulk(count, items), storage, receiver);
    }
}

impl fmt::Debug for ThreadPoolBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolBackend")
            .field("pool", &self.pool)
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::limits::{BULK_STORAGE_SIZE, SCHEDULE_STORAGE_SIZE, STORAGE_ALIGN};
    use crate::exec;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::mem::MaybeUninit;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Sender whose `connect` panics before an operation exists
    struct FaultyConnect;

    /// Larger than any caller buffer, so placement always picks the heap
    struct NeverStarted<R> {
        _receiver: R,
        _padding: [u8; 512],
    }

    impl<R: exec::Receiver> OperationState for NeverStarted<R> {
        unsafe fn start(_this: NonNull<Self>) {
            unreachable!("faulty operation was started");
        }
    }

    impl Sender for FaultyConnect {
        type Operation<R: exec::Receiver> = NeverStarted<R>;

        fn connect<R: exec::Receiver>(self, _receiver: R) -> NeverStarted<R> {
            panic!("connect failed");
        }
    }

    #[derive(Default)]
    struct Recorder {
        values: AtomicUsize,
        stopped: AtomicUsize,
        errors: Mutex<Vec<ScheduleError>>,
    }

    impl Receiver for Recorder {
        fn on_value(&self) {
            self.values.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, error: ScheduleError) {
            self.errors.lock().push(error);
        }

        fn on_stopped(&self) {
            self.stopped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[repr(C, align(16))]
    struct Buffer([MaybeUninit<u8>; SCHEDULE_STORAGE_SIZE]);

    #[test]
    fn test_operation_layouts_fit_frontend_storage() {
        let schedule = ThreadPoolBackend::schedule_layout();
        let bulk = ThreadPoolBackend::bulk_layout();

        assert!(schedule.size() <= SCHEDULE_STORAGE_SIZE);
        assert!(schedule.align() <= STORAGE_ALIGN);
        assert!(bulk.size() <= BULK_STORAGE_SIZE);
        assert!(bulk.align() <= STORAGE_ALIGN);
    }

    #[test]
    fn test_new_backend_has_empty_stats() {
        let backend = ThreadPoolBackend::new(PoolConfig::single_threaded()).unwrap();
        assert_eq!(backend.stats(), BackendStats::default());
        assert_eq!(backend.pool().num_threads(), 1);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = ThreadPoolBackend::new(PoolConfig::default().with_threads(0)).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidConfig(_)));
    }

    #[test]
    fn test_connect_panic_reports_error_once() {
        let backend = ThreadPoolBackend::new(PoolConfig::single_threaded()).unwrap();
        let mut buffer = Buffer([MaybeUninit::uninit(); SCHEDULE_STORAGE_SIZE]);

        for storage in [Storage::empty(), Storage::from_slice(&mut buffer.0)] {
            let recorder = Recorder::default();
            let receiver: NonNull<Recorder> = NonNull::from(&recorder);

            unsafe { backend.submit(FaultyConnect, storage, receiver) };

            // Reported before `submit` returned, and nothing else follows.
            assert_eq!(
                *recorder.errors.lock(),
                vec![ScheduleError::Panicked("connect failed".to_string())]
            );
            assert_eq!(recorder.values.load(Ordering::SeqCst), 0);
            assert_eq!(recorder.stopped.load(Ordering::SeqCst), 0);
        }

        let stats = backend.stats();
        assert_eq!(stats.boundary_errors, 2);
        assert_eq!(stats.inline_placements + stats.heap_placements, 0);
    }
}
