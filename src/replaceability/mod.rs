/*!
 * Replaceability Boundary
 *
 * Capabilities shared between the scheduling frontend and whatever backend is
 * installed. Both sides may be built separately, so only trait objects and
 * `#[repr(C)]` data ([`Storage`], [`Guid`]) cross this boundary; nothing here is
 * generic.
 *
 * # Completion Protocol
 *
 * A scheduled operation ends with exactly one of `on_value`, `on_error` or
 * `on_stopped`. Issuing the signal hands control back to the receiver, which
 * may tear down the memory the operation lived in, so backends release
 * everything they own *before* signalling.
 */

mod property;

pub use property::{PropertySlot, RuntimeProperty};

use crate::core::{Guid, ScheduleError, Storage};
use std::ptr::NonNull;

/// Completion handler for one scheduled operation
pub trait Receiver: Send + Sync {
    /// The work ran
    fn on_value(&self);

    /// The work could not be scheduled or failed
    fn on_error(&self, error: ScheduleError);

    /// The work was cancelled
    fn on_stopped(&self);

    /// Answer a property query; returns whether `slot` was filled
    fn query_env(&self, _slot: PropertySlot<'_>) -> bool {
        false
    }
}

/// Typed access to [`Receiver::query_env`]
pub trait ReceiverExt {
    fn try_query<P: RuntimeProperty>(&self) -> Option<P>;
}

impl<R: Receiver + ?Sized> ReceiverExt for R {
    fn try_query<P: RuntimeProperty>(&self) -> Option<P> {
        let mut out = None;
        if self.query_env(PropertySlot::for_property(&mut out)) {
            out
        } else {
            None
        }
    }
}

/// Receiver for bulk work
pub trait BulkItemReceiver: Receiver {
    /// Called once per index, from any thread, before the terminal signal
    fn on_item(&self, index: u32);
}

/// Scheduler capability implemented by backends
pub trait SystemScheduler: Send + Sync {
    /// Schedule one unit of work that completes on a backend thread
    ///
    /// # Safety
    ///
    /// `receiver` and the memory described by `storage` must stay valid, and the
    /// storage exclusively owned by the backend, until a terminal signal has been
    /// issued on `receiver`.
    unsafe fn schedule(&self, storage: Storage, receiver: NonNull<dyn Receiver>);

    /// Schedule `count` item callbacks followed by one terminal signal
    ///
    /// # Safety
    ///
    /// Same contract as [`SystemScheduler::schedule`].
    unsafe fn bulk_schedule(
        &self,
        count: u32,
        storage: Storage,
        receiver: NonNull<dyn BulkItemReceiver>,
    );
}

/// Capability type with a stable interface identifier
pub trait Capability {
    const INTERFACE_ID: Guid;
}

impl Capability for dyn SystemScheduler {
    const INTERFACE_ID: Guid = Guid::new(0x5ee9202498c4bd4f, 0xa1df2508ffcd9d7e);
}
