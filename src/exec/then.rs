/*!
 * Then Adaptor
 * Runs a closure on the thread that completes the upstream sender
 */

use super::{Receiver, Sender, StopToken};
use crate::core::ScheduleError;
use std::panic::{self, AssertUnwindSafe};

/// Sender returned by [`then`]
pub struct Then<S, F> {
    upstream: S,
    f: F,
}

/// Chain `f` after `upstream`
///
/// A panic in `f` completes the chain with `set_error`.
pub fn then<S, F>(upstream: S, f: F) -> Then<S, F>
where
    S: Sender,
    F: FnOnce() + Send + 'static,
{
    Then { upstream, f }
}

impl<S, F> Sender for Then<S, F>
where
    S: Sender,
    F: FnOnce() + Send + 'static,
{
    type Operation<R: Receiver> = S::Operation<ThenReceiver<R, F>>;

    fn connect<R: Receiver>(self, receiver: R) -> Self::Operation<R> {
        self.upstream.connect(ThenReceiver {
            downstream: receiver,
            f: self.f,
        })
    }
}

pub struct ThenReceiver<R, F> {
    downstream: R,
    f: F,
}

impl<R, F> Receiver for ThenReceiver<R, F>
where
    R: Receiver,
    F: FnOnce() + Send + 'static,
{
    fn set_value(self) {
        let Self { downstream, f } = self;
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(()) => downstream.set_value(),
            Err(payload) => downstream.set_error(ScheduleError::from_panic(payload)),
        }
    }

    fn set_error(self, error: ScheduleError) {
        self.downstream.set_error(error);
    }

    fn set_stopped(self) {
        self.downstream.set_stopped();
    }

    fn stop_token(&self) -> StopToken {
        self.downstream.stop_token()
    }
}
