/*!
 * Execution Vocabulary
 *
 * Minimal sender/receiver protocol consumed by the scheduler backends:
 * - `Sender::connect` turns a unit of work plus a receiver into an operation state
 * - `OperationState::start` launches it
 * - exactly one of `set_value`, `set_error`, `set_stopped` completes it
 *
 * # Operation State Lifetime
 *
 * An operation state is address-stable from `start` until its receiver has been
 * signalled. The signal may arrive on any thread, and may arrive before `start`
 * returns; the receiver is allowed to destroy the memory holding the operation
 * state, so `start` receives a raw pointer rather than `&mut self`.
 */

mod stop;
mod sync_wait;
mod then;

pub use stop::{StopSource, StopToken};
pub use sync_wait::{sync_wait, sync_wait_with, WaitOutcome};
pub use then::{then, Then, ThenReceiver};

use crate::core::ScheduleError;
use std::ptr::NonNull;

/// Completion handler for one operation
pub trait Receiver: Send + 'static {
    /// Work completed successfully
    fn set_value(self);

    /// Work failed
    fn set_error(self, error: ScheduleError);

    /// Work was cancelled
    fn set_stopped(self);

    /// Cancellation signal the work should observe
    fn stop_token(&self) -> StopToken {
        StopToken::never()
    }
}

/// Connected, not yet started work
pub trait OperationState {
    /// Launch the operation
    ///
    /// # Safety
    ///
    /// `this` must point to a live operation state that is not moved or dropped
    /// until its receiver has been signalled. `start` is called at most once. The
    /// receiver signal may free `*this` before `start` returns.
    unsafe fn start(this: NonNull<Self>);
}

/// Description of work that can be connected to a receiver
pub trait Sender {
    type Operation<R: Receiver>: OperationState;

    fn connect<R: Receiver>(self, receiver: R) -> Self::Operation<R>;
}
