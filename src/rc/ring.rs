//! Weak ring - circular doubly linked list of weak references per object
//!
//! Every object header carries an anchor node. Each live `Weak` owns a boxed
//! `WeakNode` spliced into the ring of the object it observes, so destruction
//! can reach and null every observer in one pass.
//!
//! Locking: all ring mutation and every read of a node's target happens under
//! the process-wide registry lock, then the object's own `ring_lock`. The
//! emptiness check on destruction only takes `ring_lock`, so objects that were
//! never observed stay off the global lock.

use crate::allocator::ObjectHeader;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use std::cell::UnsafeCell;
use std::ptr::{self, NonNull};

static WEAK_REGISTRY: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Proof that the registry lock is held
pub(crate) struct RegistryGuard(#[allow(dead_code)] MutexGuard<'static, ()>);

#[inline]
pub(crate) fn lock_registry() -> RegistryGuard {
    RegistryGuard(WEAK_REGISTRY.lock())
}

#[repr(C)]
pub(crate) struct RingLink {
    prev: UnsafeCell<*const RingLink>,
    next: UnsafeCell<*const RingLink>,
}

// Links are only touched under the registry and ring locks
unsafe impl Send for RingLink {}
unsafe impl Sync for RingLink {}

impl RingLink {
    pub(crate) const fn detached() -> Self {
        Self {
            prev: UnsafeCell::new(ptr::null()),
            next: UnsafeCell::new(ptr::null()),
        }
    }

    /// Make `this` an empty ring: both links point back at itself
    ///
    /// # Safety
    /// `this` must be valid for writes and not linked to any other node.
    pub(crate) unsafe fn close(this: *const RingLink) {
        *(*this).prev.get() = this;
        *(*this).next.get() = this;
    }

    /// # Safety
    /// Caller holds the owning object's `ring_lock`.
    pub(crate) unsafe fn is_empty(&self) -> bool {
        let next = *self.next.get();
        next.is_null() || ptr::eq(next, self)
    }

    unsafe fn splice_before(&self, anchor: &RingLink) {
        let prev = *anchor.prev.get();
        *self.prev.get() = prev;
        *self.next.get() = anchor;
        *(*prev).next.get() = self;
        *anchor.prev.get() = self;
    }

    unsafe fn splice_out(&self) {
        let prev = *self.prev.get();
        let next = *self.next.get();
        if !prev.is_null() {
            *(*prev).next.get() = next;
        }
        if !next.is_null() {
            *(*next).prev.get() = prev;
        }
        *self.prev.get() = ptr::null();
        *self.next.get() = ptr::null();
    }
}

/// Ring member owned by a `Weak`
///
/// `link` must stay the first field: the ring walk casts link pointers back
/// to nodes.
#[repr(C)]
pub(crate) struct WeakNode {
    link: RingLink,
    target: UnsafeCell<*const ObjectHeader>,
}

unsafe impl Send for WeakNode {}
unsafe impl Sync for WeakNode {}

impl WeakNode {
    pub(crate) fn new() -> Box<Self> {
        Box::new(Self {
            link: RingLink::detached(),
            target: UnsafeCell::new(ptr::null()),
        })
    }

    /// Observed object, or `None` once invalidated.
    ///
    /// A non-null target always points at a header whose storage has not been
    /// freed yet: destruction nulls every target under the same lock before
    /// releasing memory.
    #[inline]
    pub(crate) fn target(&self, _registry: &RegistryGuard) -> Option<NonNull<ObjectHeader>> {
        NonNull::new(unsafe { *self.target.get() } as *mut ObjectHeader)
    }

    /// Splice this node into the ring of `header`, unless destruction has
    /// already committed. Returns whether the node was attached.
    ///
    /// The strong count is checked under `ring_lock`, the same lock
    /// `invalidate_all` inspects the ring with, so a node never lands in a
    /// ring that was already seen empty.
    ///
    /// # Safety
    /// The node must be detached and the storage behind `header` must stay
    /// allocated for the duration of the call.
    pub(crate) unsafe fn attach(&self, header: NonNull<ObjectHeader>, _registry: &RegistryGuard) -> bool {
        let object = header.as_ref();
        let _ring = object.ring_lock.lock();
        if object.strong_count() <= 0 {
            return false;
        }
        self.link.splice_before(&object.anchor);
        *self.target.get() = header.as_ptr();
        true
    }

    /// Splice this node out of whatever ring holds it
    pub(crate) fn detach(&self, registry: &RegistryGuard) {
        let Some(header) = self.target(registry) else {
            return;
        };
        unsafe {
            let _ring = header.as_ref().ring_lock.lock();
            self.link.splice_out();
            *self.target.get() = ptr::null();
        }
    }
}

/// Null every weak reference observing `header`, returning how many were
/// cleared. Leaves the ring empty.
///
/// # Safety
/// The object's strong count must have been committed to zero.
pub(crate) unsafe fn invalidate_all(header: &ObjectHeader) -> usize {
    {
        let _ring = header.ring_lock.lock();
        if header.anchor.is_empty() {
            return 0;
        }
    }

    let _registry = lock_registry();
    let _ring = header.ring_lock.lock();

    let anchor: *const RingLink = &header.anchor;
    let mut cursor = *header.anchor.next.get();
    let mut cleared = 0;

    while !ptr::eq(cursor, anchor) {
        let next = *(*cursor).next.get();
        let node = cursor as *const WeakNode;
        *(*node).target.get() = ptr::null();
        *(*cursor).prev.get() = ptr::null();
        *(*cursor).next.get() = ptr::null();
        cursor = next;
        cleared += 1;
    }

    RingLink::close(anchor);
    cleared
}

/// Number of weak references currently observing `header`
pub(crate) fn ring_len(header: &ObjectHeader) -> usize {
    let _registry = lock_registry();
    let _ring = header.ring_lock.lock();

    let anchor: *const RingLink = &header.anchor;
    let mut count = 0;
    unsafe {
        let mut cursor = *header.anchor.next.get();
        while !cursor.is_null() && !ptr::eq(cursor, anchor) {
            count += 1;
            cursor = *(*cursor).next.get();
        }
    }
    count
}
