/*!
 * Intrusive Task Queue
 *
 * Operation states embed a `TaskHeader` as their first field. The run queue is
 * a FIFO list threaded through those headers, so it is unbounded and enqueueing
 * never allocates.
 *
 * A header carries a runner count: one queued header stands for `runners`
 * consecutive pops of the same task. It stays linked until the last runner has
 * been popped, and the task itself must not free its state before every popped
 * runner has finished.
 */

use std::cell::Cell;
use std::ptr::NonNull;

/// First field of every `#[repr(C)]` pool operation state
#[repr(C)]
pub(crate) struct TaskHeader {
    run: unsafe fn(NonNull<TaskHeader>),
    next: Cell<Option<NonNull<TaskHeader>>>,
    runners: Cell<usize>,
}

// SAFETY: `run` is a plain fn pointer; `next` and `runners` are only read or
// written by `RunQueue`, which is always accessed under the pool's queue lock.
unsafe impl Send for TaskHeader {}
unsafe impl Sync for TaskHeader {}

impl TaskHeader {
    #[inline]
    pub(crate) const fn new(run: unsafe fn(NonNull<TaskHeader>)) -> Self {
        Self {
            run,
            next: Cell::new(None),
            runners: Cell::new(0),
        }
    }
}

/// Pointer to a task header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TaskRef(NonNull<TaskHeader>);

// SAFETY: the operation state behind the header is Send and outlives every
// queued runner.
unsafe impl Send for TaskRef {}

impl TaskRef {
    /// # Safety
    ///
    /// `header` must stay valid until every runner queued for it has run.
    #[inline]
    pub(crate) unsafe fn new(header: NonNull<TaskHeader>) -> Self {
        Self(header)
    }

    /// Invoke the task; the task may free its own memory
    ///
    /// # Safety
    ///
    /// The header must still be valid.
    #[inline]
    pub(crate) unsafe fn run(self) {
        let run = (*self.0.as_ptr()).run;
        run(self.0)
    }
}

/// FIFO of task headers linked through `TaskHeader::next`
#[derive(Debug, Default)]
pub(crate) struct RunQueue {
    head: Option<NonNull<TaskHeader>>,
    tail: Option<NonNull<TaskHeader>>,
    pending: usize,
}

// SAFETY: the queue only holds pointers to Send operation states.
unsafe impl Send for RunQueue {}

impl RunQueue {
    /// Append `task` so that the next `runners` pops of it each yield one runner
    ///
    /// # Safety
    ///
    /// `task` must not already be linked, and must stay valid until its last
    /// runner has been popped and run.
    pub(crate) unsafe fn push(&mut self, task: TaskRef, runners: usize) {
        debug_assert!(runners > 0);
        let header = task.0;
        let node = &*header.as_ptr();
        node.next.set(None);
        node.runners.set(runners);

        match self.tail {
            Some(tail) => (*tail.as_ptr()).next.set(Some(header)),
            None => self.head = Some(header),
        }
        self.tail = Some(header);
        self.pending += runners;
    }

    /// Take one runner from the front of the queue
    pub(crate) fn pop(&mut self) -> Option<TaskRef> {
        let head = self.head?;

        // SAFETY: a linked header has at least one unpopped runner, so its
        // operation state cannot have been freed yet.
        let node = unsafe { &*head.as_ptr() };
        let remaining = node.runners.get() - 1;
        node.runners.set(remaining);
        if remaining == 0 {
            self.head = node.next.take();
            if self.head.is_none() {
                self.tail = None;
            }
        }

        self.pending -= 1;
        Some(TaskRef(head))
    }

    /// Runners waiting to be popped
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.pending
    }
}
