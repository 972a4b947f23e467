/*!
 * Runtime Property Queries
 *
 * Out-of-band context a receiver can expose to a backend without widening the
 * receiver vtable: the backend asks for a property by its 128-bit id and hands
 * over a type-erased output slot; the receiver fills it only if it knows the id.
 */

use crate::core::Guid;
use crate::exec::StopToken;
use std::marker::PhantomData;
use std::ptr::NonNull;

/// A value type that can be queried from a receiver
///
/// # Safety
///
/// `PROPERTY_ID` must be unique to the implementing type. [`PropertySlot::put`]
/// writes through a type-erased pointer after comparing ids only.
pub unsafe trait RuntimeProperty: Sized + 'static {
    const PROPERTY_ID: Guid;
}

// SAFETY: no other type uses this id.
unsafe impl RuntimeProperty for StopToken {
    const PROPERTY_ID: Guid = Guid::new(0x8779c09d8aa249df, 0x867db0e653202604);
}

/// Type-erased `(identifier, output buffer)` pair for one property query
pub struct PropertySlot<'a> {
    id: Guid,
    out: NonNull<()>,
    _out: PhantomData<&'a mut ()>,
}

impl<'a> PropertySlot<'a> {
    /// Slot asking for `P`, answered into `out`
    pub fn for_property<P: RuntimeProperty>(out: &'a mut Option<P>) -> Self {
        Self {
            id: P::PROPERTY_ID,
            out: NonNull::from(out).cast(),
            _out: PhantomData,
        }
    }

    /// Identifier of the requested property
    #[inline]
    pub fn id(&self) -> Guid {
        self.id
    }

    /// Answer the query with `value` if `P` is the requested property
    pub fn put<P: RuntimeProperty>(&mut self, value: P) -> bool {
        if self.id != P::PROPERTY_ID {
            return false;
        }
        // SAFETY: ids are unique per type, so `out` was built from `&mut Option<P>`.
        unsafe {
            *self.out.cast::<Option<P>>().as_ptr() = Some(value);
        }
        true
    }
}
