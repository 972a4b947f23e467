/*!
 * Blocking Wait
 * Start a sender and park the calling thread until it completes
 */

use super::{OperationState, Receiver, Sender, StopToken};
use crate::core::{ScheduleError, ScheduleResult};
use parking_lot::{Condvar, Mutex};
use std::ptr::NonNull;
use std::sync::Arc;

/// Successful outcome of [`sync_wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The sender completed with a value
    Completed,
    /// The sender was cancelled
    Stopped,
}

struct WaitState {
    result: Mutex<Option<ScheduleResult<WaitOutcome>>>,
    done: Condvar,
}

impl WaitState {
    fn complete(&self, result: ScheduleResult<WaitOutcome>) {
        let mut slot = self.result.lock();
        *slot = Some(result);
        self.done.notify_one();
    }
}

struct WaitReceiver {
    state: Arc<WaitState>,
    stop: StopToken,
}

impl Receiver for WaitReceiver {
    fn set_value(self) {
        self.state.complete(Ok(WaitOutcome::Completed));
    }

    fn set_error(self, error: ScheduleError) {
        self.state.complete(Err(error));
    }

    fn set_stopped(self) {
        self.state.complete(Ok(WaitOutcome::Stopped));
    }

    fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }
}

/// Run `sender` to completion on whatever thread it completes on
pub fn sync_wait<S: Sender>(sender: S) -> ScheduleResult<WaitOutcome> {
    sync_wait_with(sender, StopToken::never())
}

/// Like [`sync_wait`], exposing `stop` to the work as its cancellation token
pub fn sync_wait_with<S: Sender>(sender: S, stop: StopToken) -> ScheduleResult<WaitOutcome> {
    let state = Arc::new(WaitState {
        result: Mutex::new(None),
        done: Condvar::new(),
    });

    let mut operation = sender.connect(WaitReceiver {
        state: Arc::clone(&state),
        stop,
    });

    // SAFETY: `operation` stays on this frame until the receiver has fired below.
    unsafe {
        <S::Operation<WaitReceiver> as OperationState>::start(NonNull::from(&mut operation));
    }

    let mut slot = state.result.lock();
    loop {
        if let Some(result) = slot.take() {
            return result;
        }
        state.done.wait(&mut slot);
    }
}
