//! Retain, release and the destruction state machine
//!
//! Release is a single `fetch_sub`. Only the thread that observes zero enters
//! `destroy_cycle`, which drives the object through finalize and either
//! commits destruction or brings it back to life:
//!
//! ```text
//! Live --(count 0)--> Finalizing --(still unowned)--> Destroyed
//!                          |
//!                          +--(new owner)--> Resurrected --> Live
//! ```

use crate::allocator::{Lifecycle, ObjectHeader};
use crate::diagnostics;
use crate::logging::{log_destroy, log_finalize, log_resurrect};
use crate::rc::ring;
use core::ptr::NonNull;

/// Add a strong owner to a live object
///
/// Panics if the count was zero: the object is being destroyed or has not
/// been exported.
#[inline]
pub(crate) fn retain(header: NonNull<ObjectHeader>) {
    let count = unsafe { header.as_ref() }.strong.increment();
    if count <= 1 {
        retain_from_zero(header);
    }
}

#[cold]
#[inline(never)]
fn retain_from_zero(header: NonNull<ObjectHeader>) -> ! {
    let object = unsafe { header.as_ref() };
    panic!(
        "retain on '{}' ({:?}) whose strong count was zero: already being destroyed or not yet exported",
        object.identity().display_name(),
        object.state()
    );
}

/// Drop a strong owner, destroying the object on the last release
///
/// # Safety
/// The caller must own one strong reference to `header` and give it up.
#[inline]
pub(crate) unsafe fn release(header: NonNull<ObjectHeader>) {
    if header.as_ref().strong.decrement() == 0 {
        destroy_cycle(header);
    }
}

#[cold]
#[inline(never)]
unsafe fn destroy_cycle(header: NonNull<ObjectHeader>) {
    let object = header.as_ref();
    let vtable = object.vtable();
    let address = header.as_ptr() as *const u8;

    loop {
        // Guard count so finalize can hand out references without re-entering
        object.strong.increment();
        if !object.transition(Lifecycle::Live, Lifecycle::Finalizing) {
            panic!(
                "'{}' reached zero strong references in state {:?}",
                object.identity().display_name(),
                object.state()
            );
        }

        log_finalize(object.identity(), address);
        (vtable.finalize)(header);

        if object.strong.transfer(1, 0) {
            commit(header);
            return;
        }

        object.set_state(Lifecycle::Resurrected);
        log_resurrect(object.identity(), address);
        (vtable.resurrect)(header);
        object.set_state(Lifecycle::Live);

        if object.strong.decrement() != 0 {
            return;
        }
    }
}

unsafe fn commit(header: NonNull<ObjectHeader>) {
    let object = header.as_ref();
    let identity = object.identity();

    object.set_state(Lifecycle::Destroyed);
    let weak_cleared = ring::invalidate_all(object);
    diagnostics::on_destroy(identity);
    log_destroy(identity, header.as_ptr() as *const u8, weak_cleared);

    // Storage is gone after this call
    (object.vtable().destroy)(header);
}
