/*!
 * Pool Worker
 *
 * Workers pop tasks from the shared run queue, park on the pool condvar when
 * it is empty, and exit once shutdown is requested and the queue is drained.
 */

use super::{PoolShared, TaskRef};
use crate::core::ScheduleError;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error};

thread_local! {
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

/// Id of the pool owning the current thread, if it is a pool worker
pub(super) fn current_pool() -> Option<usize> {
    let id = CURRENT_POOL.with(Cell::get);
    (id != 0).then_some(id)
}

/// Worker thread main loop
pub(super) fn run(shared: Arc<PoolShared>, index: usize) {
    CURRENT_POOL.with(|current| current.set(shared.id));
    debug!(pool_id = shared.id, worker = index, "Worker started");

    let mut queue = shared.queue.lock();
    loop {
        if let Some(task) = queue.pop() {
            drop(queue);
            execute(task);
            queue = shared.queue.lock();
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        shared.wakeup.wait(&mut queue);
    }
    drop(queue);

    debug!(pool_id = shared.id, worker = index, "Worker stopped");
}

fn execute(task: TaskRef) {
    // SAFETY: operation states keep their header alive until the task has run.
    let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe { task.run() }));
    if let Err(payload) = result {
        error!(error = %ScheduleError::from_panic(payload), "Pool task panicked");
    }
}
