/*!
 * Bulk Sender
 *
 * Runs `f(i)` for every `i` in `0..count` on the pool, then completes once.
 *
 * `start` queues the task once with up to `threads` runners. Each runner that claims indices from a shared counter until the range is exhausted,
 * the stop token fires or an item fails. The last runner to leave signals the
 * receiver:
 * - any item panicked: `set_error` with the first failure
 * - fewer than `count` items ran: `set_stopped`
 * - otherwise: `set_value`
 */

use super::{PoolShared, TaskHeader, TaskRef};
use crate::core::ScheduleError;
use crate::exec::{OperationState, Receiver, Sender, StopToken};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::ptr::{addr_of_mut, NonNull};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Sender returned by [`PoolScheduler::bulk`](super::PoolScheduler::bulk)
pub struct BulkSender<F> {
    shared: Arc<PoolShared>,
    count: u32,
    f: F,
}

impl<F> BulkSender<F> {
    pub(super) fn new(shared: Arc<PoolShared>, count: u32, f: F) -> Self {
        Self { shared, count, f }
    }
}

impl<F> fmt::Debug for BulkSender<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkSender")
            .field("pool_id", &self.shared.id)
            .field("count", &self.count)
            .finish()
    }
}

impl<F> Sender for BulkSender<F>
where
    F: Fn(u32) + Send + Sync + 'static,
{
    type Operation<R: Receiver> = BulkOperation<F, R>;

    fn connect<R: Receiver>(self, receiver: R) -> BulkOperation<F, R> {
        BulkOperation {
            header: TaskHeader::new(BulkOperation::<F, R>::run),
            shared: self.shared,
            f: self.f,
            count: self.count,
            stop: receiver.stop_token(),
            next: AtomicU64::new(0),
            completed: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            failed: AtomicBool::new(false),
            failure: Mutex::new(None),
            receiver: Some(receiver),
        }
    }
}

/// Operation state for [`BulkSender`]
#[repr(C)]
pub struct BulkOperation<F, R> {
    header: TaskHeader,
    shared: Arc<PoolShared>,
    f: F,
    count: u32,
    stop: StopToken,
    next: AtomicU64,
    completed: AtomicUsize,
    active: AtomicUsize,
    failed: AtomicBool,
    failure: Mutex<Option<ScheduleError>>,
    receiver: Option<R>,
}

impl<F, R> BulkOperation<F, R>
where
    F: Fn(u32) + Send + Sync + 'static,
    R: Receiver,
{
    unsafe fn run(header: NonNull<TaskHeader>) {
        let this = header.cast::<Self>().as_ptr();
        Self::drain(&*this);

        if (*this).active.fetch_sub(1, Ordering::AcqRel) == 1 {
            Self::finish(this);
        }
    }

    /// Claim and run items until the range is exhausted or the work should end
    fn drain(&self) {
        let count = u64::from(self.count);
        loop {
            if self.stop.stop_requested() || self.failed.load(Ordering::Relaxed) {
                return;
            }

            let index = self.next.fetch_add(1, Ordering::Relaxed);
            if index >= count {
                return;
            }

            // `index < count <= u32::MAX`
            let item = index as u32;
            match panic::catch_unwind(AssertUnwindSafe(|| (self.f)(item))) {
                Ok(()) => {
                    self.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(payload) => {
                    let error = ScheduleError::from_panic(payload);
                    debug!(item, error = %error, "Bulk item panicked");
                    self.failure.lock().get_or_insert(error);
                    self.failed.store(true, Ordering::Relaxed);
                    return;
                }
            }
        }
    }

    /// Signal the receiver; only the last runner out calls this
    unsafe fn finish(this: *mut Self) {
        let failure = (*this).failure.lock().take();
        let completed = (*this).completed.load(Ordering::Acquire);
        let count = (*this).count as usize;
        let Some(receiver) = (*this).receiver.take() else {
            return;
        };

        // `*this` may be freed by the signal; nothing below touches it.
        match failure {
            Some(error) => receiver.set_error(error),
            None if completed < count => receiver.set_stopped(),
            None => receiver.set_value(),
        }
    }
}

impl<F, R> OperationState for BulkOperation<F, R>
where
    F: Fn(u32) + Send + Sync + 'static,
    R: Receiver,
{
    unsafe fn start(this: NonNull<Self>) {
        let this = this.as_ptr();

        if (*this).count == 0 {
            Self::finish(this);
            return;
        }

        let shared = Arc::clone(&(*this).shared);
        let runners = ((*this).count as usize).min(shared.threads()).max(1);
        (*this).active.store(runners, Ordering::Relaxed);

        let task = TaskRef::new(NonNull::new_unchecked(addr_of_mut!((*this).header)));
        if let Err(error) = shared.enqueue_runners(task, runners) {
            if let Some(receiver) = (*this).receiver.take() {
                receiver.set_error(error);
            }
        }
    }
}
