//! Object metadata - the header prefixed to every managed value
//!
//! Design: the header lives at offset 0 of each allocation, immediately
//! followed by the value. Handles keep a pointer to both so neither the
//! counter nor the value needs pointer chasing.

use crate::identity::TypeIdentity;
use crate::rc::{AtomicCounter, RingLink};
use core::ptr::{self, NonNull};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a managed object
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Storage allocated, value not constructed yet
    Raw = 0,
    /// Value written, `initialize` not run yet
    Constructed = 1,
    Live = 2,
    /// Strong count reached zero, `finalize` running
    Finalizing = 3,
    /// `finalize` took a new strong reference, `resurrect` running
    Resurrected = 4,
    Destroyed = 5,
}

impl Lifecycle {
    #[inline]
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Raw,
            1 => Self::Constructed,
            2 => Self::Live,
            3 => Self::Finalizing,
            4 => Self::Resurrected,
            _ => Self::Destroyed,
        }
    }
}

/// Per-type operations, one static table per concrete type
pub(crate) struct ObjectVTable {
    pub identity: fn() -> TypeIdentity,
    pub finalize: unsafe fn(NonNull<ObjectHeader>),
    pub resurrect: unsafe fn(NonNull<ObjectHeader>),
    /// Drop the value and free the storage
    pub destroy: unsafe fn(NonNull<ObjectHeader>),
}

/// Object header - prefixed before every managed value
#[repr(C, align(8))]
pub struct ObjectHeader {
    pub(crate) strong: AtomicCounter,
    /// Sentinel of the weak ring
    pub(crate) anchor: RingLink,
    /// Guards the ring-empty check
    pub(crate) ring_lock: Mutex<()>,
    state: AtomicU8,
    vtable: &'static ObjectVTable,
}

impl ObjectHeader {
    /// Write a fresh header at `ptr`: count 1, empty weak ring, state `Raw`
    ///
    /// # Safety
    /// `ptr` must be valid for writes and suitably aligned. The anchor links
    /// point into the written header, so it must never move afterwards.
    pub(crate) unsafe fn init_in_place(ptr: *mut ObjectHeader, vtable: &'static ObjectVTable) {
        ptr.write(Self {
            strong: AtomicCounter::new(1),
            anchor: RingLink::detached(),
            ring_lock: Mutex::new(()),
            state: AtomicU8::new(Lifecycle::Raw as u8),
            vtable,
        });
        RingLink::close(ptr::addr_of!((*ptr).anchor));
    }

    #[inline]
    pub fn strong_count(&self) -> isize {
        self.strong.get()
    }

    #[inline]
    pub fn state(&self) -> Lifecycle {
        Lifecycle::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: Lifecycle) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`, failing if the object is in another state
    #[inline]
    pub(crate) fn transition(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Identity of the concrete type stored after this header
    #[inline]
    pub fn identity(&self) -> TypeIdentity {
        (self.vtable.identity)()
    }

    #[inline]
    pub(crate) fn vtable(&self) -> &'static ObjectVTable {
        self.vtable
    }

    /// Distance from the header to a `T` laid out right after it
    #[inline]
    pub(crate) const fn value_offset<T>() -> usize {
        let align = core::mem::align_of::<T>();
        (core::mem::size_of::<ObjectHeader>() + align - 1) & !(align - 1)
    }

    /// # Safety
    /// `header` must start an allocation that stores a `T` after it.
    #[inline]
    pub(crate) unsafe fn value_ptr<T>(header: NonNull<ObjectHeader>) -> NonNull<T> {
        let value = header.as_ptr().cast::<u8>().add(Self::value_offset::<T>());
        NonNull::new_unchecked(value.cast())
    }

    /// Get header from a value pointer
    ///
    /// # Safety
    /// `value` must point at a `T` stored inside managed storage.
    #[inline]
    pub(crate) unsafe fn from_value<T>(value: *const T) -> NonNull<ObjectHeader> {
        let header = value.cast::<u8>().sub(Self::value_offset::<T>());
        NonNull::new_unchecked(header as *mut ObjectHeader)
    }
}
