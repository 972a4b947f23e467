/*!
 * Schedule Sender
 * Completes its receiver on one of the pool's worker threads
 */

use super::{PoolShared, TaskHeader, TaskRef};
use crate::exec::{OperationState, Receiver, Sender};
use std::fmt;
use std::ptr::{addr_of_mut, NonNull};
use std::sync::Arc;

/// Sender returned by [`PoolScheduler::schedule`](super::PoolScheduler::schedule)
pub struct ScheduleSender {
    shared: Arc<PoolShared>,
}

impl ScheduleSender {
    pub(super) fn new(shared: Arc<PoolShared>) -> Self {
        Self { shared }
    }
}

impl fmt::Debug for ScheduleSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleSender")
            .field("pool_id", &self.shared.id)
            .finish()
    }
}

impl Sender for ScheduleSender {
    type Operation<R: Receiver> = ScheduleOperation<R>;

    fn connect<R: Receiver>(self, receiver: R) -> ScheduleOperation<R> {
        ScheduleOperation {
            header: TaskHeader::new(ScheduleOperation::<R>::run),
            shared: self.shared,
            receiver: Some(receiver),
        }
    }
}

/// Operation state for [`ScheduleSender`]
#[repr(C)]
pub struct ScheduleOperation<R> {
    header: TaskHeader,
    shared: Arc<PoolShared>,
    receiver: Option<R>,
}

impl<R: Receiver> ScheduleOperation<R> {
    unsafe fn run(header: NonNull<TaskHeader>) {
        let this = header.cast::<Self>().as_ptr();
        let Some(receiver) = (*this).receiver.take() else {
            return;
        };

        // `*this` may be freed by the signal; nothing below touches it.
        if receiver.stop_token().stop_requested() {
            receiver.set_stopped();
        } else {
            receiver.set_value();
        }
    }
}

impl<R: Receiver> OperationState for ScheduleOperation<R> {
    unsafe fn start(this: NonNull<Self>) {
        let this = this.as_ptr();
        let shared = Arc::clone(&(*this).shared);
        let task = TaskRef::new(NonNull::new_unchecked(addr_of_mut!((*this).header)));

        if let Err(error) = shared.enqueue(task) {
            if let Some(receiver) = (*this).receiver.take() {
                receiver.set_error(error);
            }
        }
    }
}
