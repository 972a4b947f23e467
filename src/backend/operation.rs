/*!
 * Operation Wrapper
 *
 * Places a connected pool operation either inside caller storage or on the heap,
 * and owns its destruction.
 *
 * # Lifecycle
 *
 * 1. `OperationSlot::acquire` aligns the caller storage and picks `Inline` if the
 *    operation fits, `Heap` otherwise
 * 2. the sender is connected to a [`Completion`] that knows where the operation
 *    lives and how to destroy it, and the result is written into the slot
 * 3. `Prepared::start` launches it
 * 4. on any terminal signal the completion copies what it needs into locals,
 *    destroys the operation, then signals the boundary receiver
 *
 * Step 4 is the only way an operation is ever destroyed; nothing outside the
 * completion path frees it.
 */

use super::stats::Placement;
use crate::core::{ScheduleError, Storage};
use crate::exec::{self, OperationState, Sender, StopToken};
use crate::replaceability::{Receiver, ReceiverExt};
use std::alloc::Layout;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use tracing::trace;

/// Memory chosen for one operation state
enum OperationSlot<T> {
    /// Inside caller storage, already aligned for `T`
    Inline(NonNull<MaybeUninit<T>>),
    /// Owned allocation
    Heap(Box<MaybeUninit<T>>),
}

impl<T> OperationSlot<T> {
    /// # Safety
    ///
    /// `storage` must satisfy the [`Storage`] contract.
    unsafe fn acquire(storage: Storage) -> Self {
        let layout = Layout::new::<T>();
        let aligned = storage.align(layout.align());
        if aligned.fits(layout) {
            OperationSlot::Inline(NonNull::new_unchecked(aligned.data.cast()))
        } else {
            OperationSlot::Heap(Box::new(MaybeUninit::uninit()))
        }
    }

    fn placement(&self) -> Placement {
        match self {
            OperationSlot::Inline(_) => Placement::Inline,
            OperationSlot::Heap(_) => Placement::Heap,
        }
    }

    /// Address the operation will live at once written
    fn address(&mut self) -> NonNull<u8> {
        match self {
            OperationSlot::Inline(ptr) => ptr.cast(),
            OperationSlot::Heap(boxed) => NonNull::from(&mut **boxed).cast(),
        }
    }

    /// Move `value` into the slot; from here on only [`destroy_operation`] frees it
    fn write(self, value: T) -> NonNull<T> {
        match self {
            OperationSlot::Inline(ptr) => {
                // SAFETY: `acquire` checked size and alignment; the caller owns the bytes.
                unsafe { ptr.as_ptr().write(MaybeUninit::new(value)) };
                ptr.cast()
            }
            OperationSlot::Heap(boxed) => {
                let raw = Box::into_raw(boxed);
                // SAFETY: `raw` comes from a live box.
                unsafe {
                    (*raw).write(value);
                    NonNull::new_unchecked(raw).cast()
                }
            }
        }
    }
}

/// Type-erased destructor for a placed operation
struct OperationHandle {
    ptr: NonNull<u8>,
    placement: Placement,
    destroy: unsafe fn(NonNull<u8>, Placement),
}

impl OperationHandle {
    /// # Safety
    ///
    /// Called once, after the operation has stopped touching its own memory.
    unsafe fn destroy(self) {
        (self.destroy)(self.ptr, self.placement)
    }
}

unsafe fn destroy_operation<T>(ptr: NonNull<u8>, placement: Placement) {
    let ptr = ptr.cast::<T>().as_ptr();
    match placement {
        Placement::Inline => ptr::drop_in_place(ptr),
        Placement::Heap => drop(Box::from_raw(ptr)),
    }
}

/// Receiver connected to the pool sender; forwards to the boundary receiver
pub struct Completion<Rx: ?Sized> {
    receiver: NonNull<Rx>,
    operation: OperationHandle,
}

// SAFETY: `Rx` is a boundary receiver (`Send + Sync`), valid until signalled.
unsafe impl<Rx: ?Sized + Sync> Send for Completion<Rx> {}

impl<Rx> exec::Receiver for Completion<Rx>
where
    Rx: ?Sized + Receiver + 'static,
{
    fn set_value(self) {
        let Self {
            receiver,
            operation,
        } = self;
        // SAFETY: the pool no longer touches the operation once it signals.
        unsafe {
            operation.destroy();
            receiver.as_ref().on_value();
        }
    }

    fn set_error(self, error: ScheduleError) {
        let Self {
            receiver,
            operation,
        } = self;
        // SAFETY: as in `set_value`.
        unsafe {
            operation.destroy();
            receiver.as_ref().on_error(error);
        }
    }

    fn set_stopped(self) {
        let Self {
            receiver,
            operation,
        } = self;
        // SAFETY: as in `set_value`.
        unsafe {
            operation.destroy();
            receiver.as_ref().on_stopped();
        }
    }

    fn stop_token(&self) -> StopToken {
        // SAFETY: the receiver outlives the operation.
        unsafe { self.receiver.as_ref() }
            .try_query::<StopToken>()
            .unwrap_or_default()
    }
}

/// Connected operation placed in memory, not yet started
pub struct Prepared<T> {
    operation: NonNull<T>,
    placement: Placement,
}

impl<T: OperationState> Prepared<T> {
    pub fn placement(&self) -> Placement {
        self.placement
    }

    /// Launch; the operation may be destroyed before this returns
    ///
    /// # Safety
    ///
    /// The boundary receiver and storage passed to [`prepare`] must still be valid.
    pub unsafe fn start(self) {
        T::start(self.operation)
    }
}

/// Connect `sender` to `receiver` inside `storage`, falling back to the heap
///
/// A panic from `connect` unwinds through here without leaking: the unwritten
/// slot frees its heap box and no signal is issued.
///
/// # Safety
///
/// `storage` must satisfy the [`Storage`] contract and `receiver` must stay valid
/// until it has been signalled.
pub unsafe fn prepare<S, Rx>(
    sender: S,
    storage: Storage,
    receiver: NonNull<Rx>,
) -> Prepared<S::Operation<Completion<Rx>>>
where
    S: Sender,
    Rx: ?Sized + Receiver + 'static,
{
    let mut slot = OperationSlot::<S::Operation<Completion<Rx>>>::acquire(storage);
    let placement = slot.placement();
    trace!(
        ?placement,
        size = std::mem::size_of::<S::Operation<Completion<Rx>>>(),
        available = storage.size,
        "Placing operation"
    );

    let completion = Completion {
        receiver,
        operation: OperationHandle {
            ptr: slot.address(),
            placement,
            destroy: destroy_operation::<S::Operation<Completion<Rx>>>,
        },
    };

    let operation = slot.write(sender.connect(completion));
    Prepared {
        operation,
        placement,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Sender whose operation signals synchronously from `start`
    struct Immediate {
        drops: Arc<AtomicUsize>,
    }

    struct ImmediateOp<R> {
        receiver: Option<R>,
        drops: Arc<AtomicUsize>,
    }

    impl<R> Drop for ImmediateOp<R> {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl<R: exec::Receiver> OperationState for ImmediateOp<R> {
        unsafe fn start(this: NonNull<Self>) {
            if let Some(receiver) = (*this.as_ptr()).receiver.take() {
                receiver.set_value();
            }
        }
    }

    impl Sender for Immediate {
        type Operation<R: exec::Receiver> = ImmediateOp<R>;

        fn connect<R: exec::Receiver>(self, receiver: R) -> ImmediateOp<R> {
            ImmediateOp {
                receiver: Some(receiver),
                drops: self.drops,
            }
        }
    }

    /// Records the signal and how many operations were destroyed at that point
    struct Recorder {
        drops: Arc<AtomicUsize>,
        seen: Mutex<Vec<(&'static str, usize)>>,
    }

    impl Receiver for Recorder {
        fn on_value(&self) {
            self.seen.lock().push(("value", self.drops.load(Ordering::SeqCst)));
        }
        fn on_error(&self, _error: ScheduleError) {
            self.seen.lock().push(("error", self.drops.load(Ordering::SeqCst)));
        }
        fn on_stopped(&self) {
            self.seen.lock().push(("stopped", self.drops.load(Ordering::SeqCst)));
        }
    }

    fn recorder(drops: &Arc<AtomicUsize>) -> Recorder {
        Recorder {
            drops: Arc::clone(drops),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn receiver_ptr(receiver: &Recorder) -> NonNull<dyn Receiver> {
        let ptr: NonNull<Recorder> = NonNull::from(receiver);
        ptr
    }

    #[repr(C, align(16))]
    struct Buffer([MaybeUninit<u8>; 128]);

    #[test]
    fn test_inline_placement_destroys_before_signal() {
        let drops = Arc::new(AtomicUsize::new(0));
        let receiver = recorder(&drops);
        let mut buffer = Buffer([MaybeUninit::uninit(); 128]);

        let placement = unsafe {
            let prepared = prepare(
                Immediate {
                    drops: Arc::clone(&drops),
                },
                Storage::from_slice(&mut buffer.0),
                receiver_ptr(&receiver),
            );
            let placement = prepared.placement();
            prepared.start();
            placement
        };

        assert_eq!(placement, Placement::Inline);
        assert_eq!(*receiver.seen.lock(), vec![("value", 1)]);
    }

    #[test]
    fn test_heap_placement_without_storage() {
        let drops = Arc::new(AtomicUsize::new(0));
        let receiver = recorder(&drops);

        let placement = unsafe {
            let prepared = prepare(
                Immediate {
                    drops: Arc::clone(&drops),
                },
                Storage::empty(),
                receiver_ptr(&receiver),
            );
            let placement = prepared.placement();
            prepared.start();
            placement
        };

        assert_eq!(placement, Placement::Heap);
        assert_eq!(*receiver.seen.lock(), vec![("value", 1)]);
    }

    #[test]
    fn test_too_small_storage_falls_back_to_heap() {
        let drops = Arc::new(AtomicUsize::new(0));
        let receiver = recorder(&drops);
        let mut buffer = Buffer([MaybeUninit::uninit(); 128]);

        let placement = unsafe {
            let prepared = prepare(
                Immediate {
                    drops: Arc::clone(&drops),
                },
                Storage::from_slice(&mut buffer.0[..4]),
                receiver_ptr(&receiver),
            );
            let placement = prepared.placement();
            prepared.start();
            placement
        };

        assert_eq!(placement, Placement::Heap);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }
}
