/*!
 * Inline Operation Storage
 * Aligned scratch buffer embedded in frontend operation states
 */

use crate::core::limits::STORAGE_ALIGN;
use crate::core::Storage;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;

/// `N` bytes aligned to [`STORAGE_ALIGN`], lent to the backend while an
/// operation is in flight
#[repr(C, align(16))]
pub(crate) struct AlignedStorage<const N: usize> {
    bytes: UnsafeCell<[MaybeUninit<u8>; N]>,
}

const _: () = assert!(std::mem::align_of::<AlignedStorage<8>>() == STORAGE_ALIGN);

impl<const N: usize> AlignedStorage<N> {
    pub(crate) const fn new() -> Self {
        Self {
            bytes: UnsafeCell::new([MaybeUninit::uninit(); N]),
        }
    }

    /// Describe the buffer behind `this` without creating a reference to it
    ///
    /// # Safety
    ///
    /// `this` must point to a live `AlignedStorage<N>`.
    pub(crate) unsafe fn describe(this: *mut Self) -> Storage {
        let size = u32::try_from(N).unwrap_or(u32::MAX);
        Storage::new(UnsafeCell::raw_get(std::ptr::addr_of!((*this).bytes)).cast(), size)
    }
}
