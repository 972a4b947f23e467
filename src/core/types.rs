/*!
 * Core Types
 * Plain data that crosses the scheduler boundary
 */

use serde::{Deserialize, Serialize};
use std::alloc::Layout;
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr;

/// 128-bit identifier for capabilities and runtime properties
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Guid {
    pub high: u64,
    pub low: u64,
}

impl Guid {
    /// The all-zero identifier; never names a real capability or property
    pub const NIL: Guid = Guid::new(0, 0);

    #[inline]
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    #[inline]
    pub const fn is_nil(&self) -> bool {
        self.high == 0 && self.low == 0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:016x}", self.high, self.low)
    }
}

/// Caller-owned memory handed to a backend for an operation's state
///
/// `{null, 0}` means "no preallocated storage": the backend always heap-allocates.
///
/// # Contract
///
/// When `data` is non-null, `[data, data + size)` must be writable and exclusively
/// owned by the caller until the scheduled operation signals completion. The
/// backend never touches memory outside that range and keeps no reference to it
/// after the terminal signal.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Storage {
    pub data: *mut u8,
    pub size: u32,
}

impl Storage {
    /// No preallocated storage
    #[inline]
    pub const fn empty() -> Self {
        Self {
            data: ptr::null_mut(),
            size: 0,
        }
    }

    #[inline]
    pub const fn new(data: *mut u8, size: u32) -> Self {
        Self { data, size }
    }

    /// Describe a caller buffer; sizes beyond `u32::MAX` are truncated to it
    #[inline]
    pub fn from_slice(buffer: &mut [MaybeUninit<u8>]) -> Self {
        let size = u32::try_from(buffer.len()).unwrap_or(u32::MAX);
        Self {
            data: buffer.as_mut_ptr().cast(),
            size,
        }
    }

    /// True when there is no usable memory behind this descriptor
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_null() || self.size == 0
    }

    /// Shift the region so it starts on `alignment`, shrinking it by the shift
    ///
    /// An already-aligned region (a null pointer counts as aligned) is returned
    /// unchanged. A region smaller than `alignment` cannot be shifted and yields
    /// [`Storage::empty`].
    pub fn align(self, alignment: usize) -> Storage {
        debug_assert!(alignment.is_power_of_two());

        let address = self.data as usize;
        if address % alignment == 0 {
            return self;
        }
        if (self.size as usize) < alignment {
            return Storage::empty();
        }

        let aligned = (address + alignment - 1) & !(alignment - 1);
        let shift = aligned - address;
        Storage {
            data: self.data.wrapping_add(shift),
            size: self.size - shift as u32,
        }
    }

    /// Whether a value with `layout` can be placed at the start of this region
    #[inline]
    pub fn fits(&self, layout: Layout) -> bool {
        !self.data.is_null()
            && (self.data as usize) % layout.align() == 0
            && self.size as usize >= layout.size()
    }
}

impl Default for Storage {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[repr(C, align(64))]
    struct Buffer([MaybeUninit<u8>; 256]);

    fn buffer() -> Box<Buffer> {
        Box::new(Buffer([MaybeUninit::uninit(); 256]))
    }

    #[test]
    fn test_aligned_storage_unchanged() {
        let mut buf = buffer();
        let storage = Storage::from_slice(&mut buf.0);
        assert_eq!(storage.align(16), storage);
        assert_eq!(storage.align(64), storage);
    }

    #[test]
    fn test_empty_storage_stays_empty() {
        let storage = Storage::empty();
        assert_eq!(storage.align(8), storage);
        assert!(storage.align(8).is_empty());
    }

    #[test]
    fn test_misaligned_storage_shifts_and_shrinks() {
        let mut buf = buffer();
        let base = buf.0.as_mut_ptr().cast::<u8>();
        let storage = Storage::new(base.wrapping_add(3), 100);

        let aligned = storage.align(16);
        assert_eq!(aligned.data, base.wrapping_add(16));
        assert_eq!(aligned.size, 87);
    }

    #[test]
    fn test_too_small_storage_becomes_empty() {
        let mut buf = buffer();
        let base = buf.0.as_mut_ptr().cast::<u8>();
        let storage = Storage::new(base.wrapping_add(1), 7);

        assert_eq!(storage.align(8), Storage::empty());
    }

    #[test]
    fn test_fits_checks_size_and_alignment() {
        let mut buf = buffer();
        let storage = Storage::from_slice(&mut buf.0);

        assert!(storage.fits(Layout::new::<[u64; 32]>()));
        assert!(!storage.fits(Layout::new::<[u64; 33]>()));
        assert!(!Storage::empty().fits(Layout::new::<u8>()));

        let shifted = Storage::new(storage.data.wrapping_add(1), 64);
        assert!(!shifted.fits(Layout::new::<u64>()));
    }

    #[test]
    fn test_guid_display() {
        let id = Guid::new(0x5ee9202498c4bd4f, 0xa1df2508ffcd9d7e);
        assert_eq!(id.to_string(), "5ee9202498c4bd4f-a1df2508ffcd9d7e");
        assert!(Guid::NIL.is_nil());
        assert!(!id.is_nil());
    }
}
