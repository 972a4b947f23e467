/*!
 * System Context Frontend
 *
 * Caller-facing scheduler that routes work through whichever backend the
 * process registry currently holds.
 *
 * # Example
 *
 * ```no_run
 * use system_context::context::get_system_scheduler;
 * use system_context::exec::{sync_wait, then};
 *
 * let scheduler = get_system_scheduler().unwrap();
 * sync_wait(then(scheduler.schedule(), || println!("on a pool thread"))).unwrap();
 * ```
 *
 * # Allocation
 *
 * Frontend operation states embed an aligned buffer that is lent to the backend
 * as [`Storage`](crate::core::Storage). With the default backend a schedule or bulk
 * operation fits in that buffer, so no heap allocation happens per operation.
 *
 * # Backend Lifetime
 *
 * An operation state holds its backend until the operation itself is dropped.
 * When the registry has replaced that backend in the meantime, the last
 * reference therefore goes away wherever the completed operation is destroyed,
 * not inside `start`. `start` holds one extra reference for the duration of the
 * backend call; it is the last one only if the operation completed and was
 * destroyed before the call returned, in which case dropping the default backend
 * joins its workers on the starting thread.
 */

mod adapter;
mod storage;

use crate::backend::query_system_context;
use crate::core::limits::{BULK_STORAGE_SIZE, SCHEDULE_STORAGE_SIZE};
use crate::core::ScheduleResult;
use crate::exec::{self, OperationState, Sender};
use crate::replaceability::{BulkItemReceiver, Receiver, SystemScheduler};
use adapter::{BulkAdapter, ReceiverAdapter};
use std::fmt;
use std::marker::PhantomPinned;
use std::ptr::{addr_of_mut, NonNull};
use std::sync::Arc;
use storage::AlignedStorage;

/// Progress guarantee a scheduler gives the work it runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardProgress {
    Concurrent,
    Parallel,
    WeaklyParallel,
}

/// Scheduler for the process-wide backend
pub fn get_system_scheduler() -> ScheduleResult<SystemContextScheduler> {
    query_system_context::<dyn SystemScheduler>().map(SystemContextScheduler::new)
}

/// Handle onto one backend instance
///
/// Equality means "same backend instance". A handle keeps its backend alive
/// after the registry has moved on to a different one.
#[derive(Clone)]
pub struct SystemContextScheduler {
    backend: Arc<dyn SystemScheduler>,
}

impl SystemContextScheduler {
    pub fn new(backend: Arc<dyn SystemScheduler>) -> Self {
        Self { backend }
    }

    /// Sender that completes on a backend thread
    pub fn schedule(&self) -> SystemSender {
        SystemSender {
            backend: Arc::clone(&self.backend),
        }
    }

    /// Sender that runs `f(i)` for each `i` in `0..count`, then completes
    ///
    /// A panic in `f` completes the sender with the first captured error once
    /// every item has run.
    pub fn bulk<F>(&self, count: u32, f: F) -> SystemBulkSender<F>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        SystemBulkSender {
            backend: Arc::clone(&self.backend),
            count,
            f,
        }
    }

    pub fn forward_progress_guarantee(&self) -> ForwardProgress {
        ForwardProgress::Parallel
    }

    pub fn backend(&self) -> &Arc<dyn SystemScheduler> {
        &self.backend
    }
}

impl PartialEq for SystemContextScheduler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }
}

impl Eq for SystemContextScheduler {}

impl fmt::Debug for SystemContextScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemContextScheduler")
            .field("backend", &Arc::as_ptr(&self.backend).cast::<()>())
            .finish()
    }
}

/// Sender returned by [`SystemContextScheduler::schedule`]
pub struct SystemSender {
    backend: Arc<dyn SystemScheduler>,
}

impl Sender for SystemSender {
    type Operation<R: exec::Receiver> = SystemOperation<R>;

    fn connect<R: exec::Receiver>(self, receiver: R) -> SystemOperation<R> {
        SystemOperation {
            storage: AlignedStorage::new(),
            adapter: ReceiverAdapter::new(receiver),
            backend: self.backend,
            _pinned: PhantomPinned,
        }
    }
}

/// Operation state for [`SystemSender`]
pub struct SystemOperation<R> {
    storage: AlignedStorage<SCHEDULE_STORAGE_SIZE>,
    adapter: ReceiverAdapter<R>,
    backend: Arc<dyn SystemScheduler>,
    _pinned: PhantomPinned,
}

impl<R: exec::Receiver> OperationState for SystemOperation<R> {
    unsafe fn start(this: NonNull<Self>) {
        let this = this.as_ptr();
        if (*this).adapter.stop_requested() {
            (*this).adapter.on_stopped();
            return;
        }
        let backend = Arc::clone(&(*this).backend);

        let storage = AlignedStorage::describe(addr_of_mut!((*this).storage));
        let receiver: NonNull<dyn Receiver> =
            NonNull::<ReceiverAdapter<R>>::new_unchecked(addr_of_mut!((*this).adapter));
        // `*this` may be gone once this returns.
        backend.schedule(storage, receiver);
    }
}

/// Sender returned by [`SystemContextScheduler::bulk`]
pub struct SystemBulkSender<F> {
    backend: Arc<dyn SystemScheduler>,
    count: u32,
    f: F,
}

impl<F> Sender for SystemBulkSender<F>
where
    F: Fn(u32) + Send + Sync + 'static,
{
    type Operation<R: exec::Receiver> = SystemBulkOperation<F, R>;

    fn connect<R: exec::Receiver>(self, receiver: R) -> SystemBulkOperation<F, R> {
        SystemBulkOperation {
            storage: AlignedStorage::new(),
            adapter: BulkAdapter::new(receiver, self.f),
            count: self.count,
            backend: self.backend,
            _pinned: PhantomPinned,
        }
    }
}

/// Operation state for [`SystemBulkSender`]
pub struct SystemBulkOperation<F, R> {
    storage: AlignedStorage<BULK_STORAGE_SIZE>,
    adapter: BulkAdapter<R, F>,
    count: u32,
    backend: Arc<dyn SystemScheduler>,
    _pinned: PhantomPinned,
}

impl<F, R> OperationState for SystemBulkOperation<F, R>
where
    F: Fn(u32) + Send + Sync + 'static,
    R: exec::Receiver,
{
    unsafe fn start(this: NonNull<Self>) {
        let this = this.as_ptr();
        if (*this).adapter.stop_requested() {
            (*this).adapter.on_stopped();
            return;
        }
        let backend = Arc::clone(&(*this).backend);

        let count = (*this).count;
        let storage = AlignedStorage::describe(addr_of_mut!((*this).storage));
        let receiver: NonNull<dyn BulkItemReceiver> =
            NonNull::<BulkAdapter<R, F>>::new_unchecked(addr_of_mut!((*this).adapter));
        // `*this` may be gone once this returns.
        backend.bulk_schedule(count, storage, receiver);
    }
}
