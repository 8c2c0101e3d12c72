//! Managed objects - factories, export, and per-type operations
//!
//! Objects are created in two phases. The value is constructed first, with no
//! way to reach a handle to itself. Once it sits in managed storage it is
//! exported: it becomes live and `initialize` runs with a strong handle to
//! `self`, the first point where self-references may escape.

use crate::allocator::{self, Lifecycle, ObjectHeader, ObjectVTable, RawSlot, Slot};
use crate::diagnostics;
use crate::error::Result;
use crate::identity::TypeIdentity;
use crate::logging::log_export;
use crate::rc::Strong;
use core::marker::PhantomData;
use core::mem::ManuallyDrop;
use core::ptr::{self, NonNull};

/// A type that lives in managed storage
///
/// All hooks have empty defaults.
pub trait Managed: Send + Sync + Sized + 'static {
    /// Runs once, right after the object becomes live
    ///
    /// An error propagates out of the factory. The factory's own handle is
    /// dropped, so the object survives only through references this hook
    /// let escape.
    fn initialize(&self, this: &Strong<Self>) -> Result<()> {
        let _ = this;
        Ok(())
    }

    /// Runs when the last strong reference goes away
    ///
    /// Cloning `this` (storing it somewhere reachable) resurrects the object.
    fn finalize(&self, this: &Strong<Self>) {
        let _ = this;
    }

    /// Runs after `finalize` resurrected the object
    fn resurrect(&self) {}
}

/// Allocate `value` in managed storage and export it
pub fn create<T: Managed>(value: T) -> Result<Strong<T>> {
    create_via(move || Ok(value))
}

/// Allocate storage, then build the value in place with `construct`
///
/// The storage is freed without export or finalize if `construct` fails or
/// panics.
pub fn create_via<T, F>(construct: F) -> Result<Strong<T>>
where
    T: Managed,
    F: FnOnce() -> Result<T>,
{
    let raw = RawSlot::allocate(Slot::<T>::layout(), TypeIdentity::of::<T>())?;
    let slot = raw.as_ptr().cast::<Slot<T>>();

    unsafe { ObjectHeader::init_in_place(ptr::addr_of_mut!((*slot).header), &ObjectOps::<T>::VTABLE) };
    let value = construct()?;

    let header = unsafe {
        ptr::addr_of_mut!((*slot).value).write(value);
        raw.commit()
    };
    unsafe { header.as_ref() }.set_state(Lifecycle::Constructed);
    diagnostics::on_construct();

    let this = unsafe { Strong::adopt(header, ObjectHeader::value_ptr::<T>(header)) };
    export(header);
    this.initialize(&this)?;

    Ok(this)
}

/// Make a constructed object live
pub(crate) fn export(header: NonNull<ObjectHeader>) {
    let object = unsafe { header.as_ref() };
    let identity = object.identity();

    object.set_state(Lifecycle::Live);
    diagnostics::on_export(identity);
    log_export(identity, header.as_ptr() as *const u8);
}

/// Static operations table for `T`
struct ObjectOps<T>(PhantomData<T>);

impl<T: Managed> ObjectOps<T> {
    const VTABLE: ObjectVTable = ObjectVTable {
        identity: TypeIdentity::of::<T>,
        finalize: Self::finalize,
        resurrect: Self::resurrect,
        destroy: Self::destroy,
    };

    /// # Safety
    /// `header` must start a `Slot<T>` in state `Finalizing`.
    unsafe fn finalize(header: NonNull<ObjectHeader>) {
        // Borrowed view of the guard reference; never released here
        let this = ManuallyDrop::new(Strong::<T>::adopt(header, ObjectHeader::value_ptr(header)));
        let value: &T = &*ObjectHeader::value_ptr::<T>(header).as_ptr();
        value.finalize(&this);
    }

    unsafe fn resurrect(header: NonNull<ObjectHeader>) {
        let value: &T = &*ObjectHeader::value_ptr::<T>(header).as_ptr();
        value.resurrect();
    }

    unsafe fn destroy(header: NonNull<ObjectHeader>) {
        let slot = header.as_ptr().cast::<Slot<T>>();
        ptr::drop_in_place(ptr::addr_of_mut!((*slot).value));
        allocator::free(header.cast(), Slot::<T>::layout());
    }
}
