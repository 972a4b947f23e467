/*!
 * Receiver Adapters
 *
 * Bridge an `exec` receiver onto the boundary protocol. The wrapped receiver is
 * moved out before it is signalled, so the adapter (and the operation state it
 * lives in) may be freed by the signal.
 */

use crate::core::ScheduleError;
use crate::exec::{self, StopToken};
use crate::replaceability::{BulkItemReceiver, PropertySlot, Receiver};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use tracing::debug;

pub(crate) struct ReceiverAdapter<R> {
    receiver: Mutex<Option<R>>,
    stop: StopToken,
}

impl<R: exec::Receiver> ReceiverAdapter<R> {
    pub(crate) fn new(receiver: R) -> Self {
        let stop = receiver.stop_token();
        Self {
            receiver: Mutex::new(Some(receiver)),
            stop,
        }
    }

    #[inline]
    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.stop_requested()
    }

    fn take(&self) -> Option<R> {
        self.receiver.lock().take()
    }
}

impl<R: exec::Receiver> Receiver for ReceiverAdapter<R> {
    fn on_value(&self) {
        let receiver = self.take();
        if let Some(receiver) = receiver {
            receiver.set_value();
        }
    }

    fn on_error(&self, error: ScheduleError) {
        let receiver = self.take();
        if let Some(receiver) = receiver {
            receiver.set_error(error);
        }
    }

    fn on_stopped(&self) {
        let receiver = self.take();
        if let Some(receiver) = receiver {
            receiver.set_stopped();
        }
    }

    fn query_env(&self, mut slot: PropertySlot<'_>) -> bool {
        slot.put(self.stop.clone())
    }
}

/// Bulk adapter: runs `f` per item and reports the first panic at completion
pub(crate) struct BulkAdapter<R, F> {
    inner: ReceiverAdapter<R>,
    f: F,
    failure: Mutex<Option<ScheduleError>>,
}

impl<R, F> BulkAdapter<R, F>
where
    R: exec::Receiver,
    F: Fn(u32) + Send + Sync + 'static,
{
    pub(crate) fn new(receiver: R, f: F) -> Self {
        Self {
            inner: ReceiverAdapter::new(receiver),
            f,
            failure: Mutex::new(None),
        }
    }

    #[inline]
    pub(crate) fn stop_requested(&self) -> bool {
        self.inner.stop_requested()
    }
}

impl<R, F> Receiver for BulkAdapter<R, F>
where
    R: exec::Receiver,
    F: Fn(u32) + Send + Sync + 'static,
{
    fn on_value(&self) {
        let failure = self.failure.lock().take();
        match failure {
            Some(error) => self.inner.on_error(error),
            None => self.inner.on_value(),
        }
    }

    fn on_error(&self, error: ScheduleError) {
        self.inner.on_error(error);
    }

    fn on_stopped(&self) {
        let failure = self.failure.lock().take();
        match failure {
            Some(error) => self.inner.on_error(error),
            None => self.inner.on_stopped(),
        }
    }

    fn query_env(&self, slot: PropertySlot<'_>) -> bool {
        self.inner.query_env(slot)
    }
}

impl<R, F> BulkItemReceiver for BulkAdapter<R, F>
where
    R: exec::Receiver,
    F: Fn(u32) + Send + Sync + 'static,
{
    fn on_item(&self, index: u32) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.f)(index))) {
            let error = ScheduleError::from_panic(payload);
            debug!(index, error = %error, "Bulk item panicked");
            self.failure.lock().get_or_insert(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::StopSource;
    use crate::replaceability::ReceiverExt;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Probe {
        log: Arc<parking_lot::Mutex<Vec<String>>>,
        stop: StopToken,
    }

    impl exec::Receiver for Probe {
        fn set_value(self) {
            self.log.lock().push("value".to_string());
        }
        fn set_error(self, error: ScheduleError) {
            self.log.lock().push(format!("error: {error}"));
        }
        fn set_stopped(self) {
            self.log.lock().push("stopped".to_string());
        }
        fn stop_token(&self) -> StopToken {
            self.stop.clone()
        }
    }

    #[test]
    fn test_signals_once() {
        let probe = Probe::default();
        let adapter = ReceiverAdapter::new(probe.clone());

        adapter.on_value();
        adapter.on_stopped();
        adapter.on_error(ScheduleError::PoolShutdown);

        assert_eq!(*probe.log.lock(), vec!["value".to_string()]);
    }

    #[test]
    fn test_exposes_stop_token() {
        let source = StopSource::new();
        let probe = Probe {
            stop: source.token(),
            ..Probe::default()
        };
        let adapter = ReceiverAdapter::new(probe);
        assert!(!adapter.stop_requested());

        let token = adapter.try_query::<StopToken>().expect("no stop token");
        source.request_stop();
        assert!(token.stop_requested());
        assert!(adapter.stop_requested());
    }

    #[test]
    fn test_bulk_item_panic_reported_at_completion() {
        let probe = Probe::default();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let adapter = BulkAdapter::new(probe.clone(), move |i| {
            counter.fetch_add(1, Ordering::Relaxed);
            if i == 2 {
                panic!("bad item");
            }
        });

        for i in 0..4 {
            adapter.on_item(i);
        }
        adapter.on_value();

        assert_eq!(calls.load(Ordering::Relaxed), 4);
        assert_eq!(
            *probe.log.lock(),
            vec!["error: Scheduled work panicked: bad item".to_string()]
        );
    }
}
