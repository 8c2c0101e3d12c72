//! Storage for managed values
//!
//! Design: one global-allocator block per object, header first, value after.
//! `RawSlot` owns a block between allocation and construction and returns it
//! on drop, so a failing or panicking constructor never leaks.

mod header;


pub use header::{Lifecycle, ObjectHeader};
pub(crate) use header::ObjectVTable;

use crate::error::{HeapError, Result};
use crate::identity::TypeIdentity;
use crate::logging::{log_allocation, log_deallocation};
use core::ptr::NonNull;
use std::alloc::{self, Layout};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Header followed by a single value
#[repr(C)]
pub(crate) struct Slot<T> {
    pub header: ObjectHeader,
    pub value: T,
}

impl<T> Slot<T> {
    #[inline]
    pub fn layout() -> Layout {
        Layout::new::<Self>()
    }
}

static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static DEALLOCATIONS: AtomicUsize = AtomicUsize::new(0);
static LIVE_BYTES: AtomicUsize = AtomicUsize::new(0);

/// Allocator statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub allocations: usize,
    pub deallocations: usize,
    /// Bytes held by objects not yet destroyed
    pub live_bytes: usize,
}

/// Snapshot of process-wide allocation counters
pub fn stats() -> AllocatorStats {
    AllocatorStats {
        allocations: ALLOCATIONS.load(Ordering::Relaxed),
        deallocations: DEALLOCATIONS.load(Ordering::Relaxed),
        live_bytes: LIVE_BYTES.load(Ordering::Relaxed),
    }
}

/// Uncommitted storage, freed on drop
pub(crate) struct RawSlot {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl RawSlot {
    pub fn allocate(layout: Layout, identity: TypeIdentity) -> Result<Self> {
        debug_assert!(layout.size() >= core::mem::size_of::<ObjectHeader>());

        let ptr = unsafe { alloc::alloc(layout) };
        let ptr = NonNull::new(ptr).ok_or_else(|| HeapError::AllocationFailed {
            type_name: identity.display_name().to_string(),
            size: layout.size(),
        })?;

        ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        LIVE_BYTES.fetch_add(layout.size(), Ordering::Relaxed);
        log_allocation(layout.size(), ptr.as_ptr());

        Ok(Self { ptr, layout })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline]
    pub fn header_ptr(&self) -> *mut ObjectHeader {
        self.ptr.as_ptr().cast()
    }

    /// Hand the block over to the object; `free` releases it from now on
    #[inline]
    pub fn commit(self) -> NonNull<ObjectHeader> {
        let header = self.ptr.cast();
        core::mem::forget(self);
        header
    }
}

impl Drop for RawSlot {
    fn drop(&mut self) {
        unsafe { free(self.ptr, self.layout) }
    }
}

/// Return an object's block to the global allocator
///
/// # Safety
/// `ptr` must come from `RawSlot::allocate` with the same `layout` and must
/// not be used afterwards.
pub(crate) unsafe fn free(ptr: NonNull<u8>, layout: Layout) {
    alloc::dealloc(ptr.as_ptr(), layout);

    DEALLOCATIONS.fetch_add(1, Ordering::Relaxed);
    LIVE_BYTES.fetch_sub(layout.size(), Ordering::Relaxed);
    log_deallocation(layout.size(), ptr.as_ptr());
}
