//! Strong handle - owning, nullable reference to a managed object

use crate::allocator::{Lifecycle, ObjectHeader};
use crate::error::{HeapError, Result};
use crate::object::Managed;
use crate::rc::{lifecycle, ring};
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::ops::Deref;
use core::ptr::NonNull;

/// Header and typed value of a live object
pub(crate) struct Target<T: ?Sized> {
    pub header: NonNull<ObjectHeader>,
    pub value: NonNull<T>,
}

impl<T: ?Sized> Clone for Target<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ?Sized> Copy for Target<T> {}

/// Owning handle to a managed object
///
/// Cloning adds a strong owner and dropping removes one; moving transfers
/// ownership without touching the count. A handle may be null.
///
/// Comparison and hashing use object identity, never the value.
pub struct Strong<T: ?Sized> {
    target: Option<Target<T>>,
    _owns: PhantomData<T>,
}

// Managed values are Send + Sync and the count is atomic
unsafe impl<T: ?Sized + Send + Sync> Send for Strong<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Strong<T> {}

impl<T: ?Sized> Strong<T> {
    #[inline]
    pub const fn null() -> Self {
        Self {
            target: None,
            _owns: PhantomData,
        }
    }

    /// Wrap a reference the caller already owns
    ///
    /// # Safety
    /// One strong owner of `header` is transferred to the handle and `value`
    /// must point into the same object.
    #[inline]
    pub(crate) unsafe fn adopt(header: NonNull<ObjectHeader>, value: NonNull<T>) -> Self {
        Self {
            target: Some(Target { header, value }),
            _owns: PhantomData,
        }
    }

    /// # Safety
    /// `target` must describe a live object.
    #[inline]
    pub(crate) unsafe fn retain_target(target: Target<T>) -> Self {
        lifecycle::retain(target.header);
        Self::adopt(target.header, target.value)
    }

    #[inline]
    pub(crate) fn target(&self) -> Option<Target<T>> {
        self.target
    }

    #[inline]
    pub(crate) fn header(&self) -> Option<&ObjectHeader> {
        self.target.map(|t| unsafe { &*t.header.as_ptr() })
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.target.is_none()
    }

    /// Object address, 0 for null
    #[inline]
    pub fn addr(&self) -> usize {
        self.target.map_or(0, |t| t.header.as_ptr() as usize)
    }

    #[inline]
    pub fn as_ref(&self) -> Option<&T> {
        self.target.map(|t| unsafe { &*t.value.as_ptr() })
    }

    /// Number of strong owners, 0 for null
    pub fn strong_count(&self) -> usize {
        self.header().map_or(0, |h| h.strong_count().max(0) as usize)
    }

    /// Number of weak references observing the object
    pub fn weak_count(&self) -> usize {
        self.header().map_or(0, ring::ring_len)
    }

    pub fn state(&self) -> Option<Lifecycle> {
        self.header().map(ObjectHeader::state)
    }

    /// Same object, regardless of the handle's static type
    #[inline]
    pub fn ptr_eq<U: ?Sized>(&self, other: &Strong<U>) -> bool {
        self.addr() == other.addr()
    }

    /// Leave null behind, keeping the count unchanged
    #[inline]
    pub fn take(&mut self) -> Self {
        Self {
            target: self.target.take(),
            _owns: PhantomData,
        }
    }

    pub fn clear(&mut self) {
        drop(self.take());
    }

    /// Point at `other`'s object, retaining it before releasing the old one
    pub fn assign(&mut self, other: &Strong<T>) {
        if self.ptr_eq(other) {
            return;
        }
        let previous = mem::replace(self, other.clone());
        drop(previous);
    }

    /// Move `other` in, releasing the old object
    pub fn set(&mut self, other: Strong<T>) {
        let previous = mem::replace(self, other);
        drop(previous);
    }

    /// Re-type the handle, usually to a trait object
    ///
    /// ```ignore
    /// let shape: Strong<dyn Shape> = circle.upcast(|c| c as &dyn Shape);
    /// ```
    pub fn upcast<U: ?Sized>(self, cast: impl for<'a> FnOnce(&'a T) -> &'a U) -> Strong<U> {
        let this = ManuallyDrop::new(self);
        match this.target {
            None => Strong::null(),
            Some(t) => {
                let value = cast(unsafe { &*t.value.as_ptr() });
                unsafe { Strong::adopt(t.header, NonNull::from(value)) }
            }
        }
    }

    /// Checked cast to the concrete type; null on mismatch
    pub fn downcast<U: 'static>(&self) -> Strong<U> {
        match self.header() {
            Some(header) if header.identity().id() == core::any::TypeId::of::<U>() => unsafe {
                self.downcast_unchecked()
            },
            _ => Strong::null(),
        }
    }

    /// # Safety
    /// The object must really store a `U`.
    pub unsafe fn downcast_unchecked<U: 'static>(&self) -> Strong<U> {
        match self.target {
            Some(t) => Strong::retain_target(Target {
                header: t.header,
                value: ObjectHeader::value_ptr::<U>(t.header),
            }),
            None => Strong::null(),
        }
    }

    /// `TypeName@0xADDR` of the concrete object, or `null`
    pub fn describe(&self) -> String {
        match self.target {
            Some(t) => format!(
                "{}@{:p}",
                unsafe { t.header.as_ref() }.identity().display_name(),
                t.value.as_ptr() as *const u8
            ),
            None => "null".to_string(),
        }
    }

    /// Mutable access while this handle is the only way to reach the object
    pub fn get_mut(&mut self) -> Option<&mut T> {
        let t = self.target?;
        let header = unsafe { t.header.as_ref() };
        if header.strong_count() != 1 || ring::ring_len(header) != 0 {
            return None;
        }
        Some(unsafe { &mut *t.value.as_ptr() })
    }
}

impl<T: ?Sized + 'static> Strong<T> {
    /// Dereference, failing on a null handle
    pub fn get(&self) -> Result<&T> {
        self.as_ref().ok_or_else(HeapError::null_dereference::<T>)
    }
}

impl<T: Managed> Strong<T> {
    /// Allocate and export a new object
    pub fn new(value: T) -> Result<Self> {
        crate::object::create(value)
    }

    /// Take a new strong reference to an object from inside its storage
    ///
    /// # Safety
    /// `value` must live inside managed storage created by this crate.
    pub unsafe fn from_object(value: &T) -> Self {
        let header = ObjectHeader::from_value(value as *const T);
        Self::retain_target(Target {
            header,
            value: NonNull::from(value),
        })
    }
}

impl<T: ?Sized> Clone for Strong<T> {
    #[inline]
    fn clone(&self) -> Self {
        match self.target {
            Some(t) => unsafe { Self::retain_target(t) },
            None => Self::null(),
        }
    }
}

impl<T: ?Sized> Drop for Strong<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(t) = self.target.take() {
            unsafe { lifecycle::release(t.header) }
        }
    }
}

impl<T: ?Sized> Default for Strong<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized + 'static> Deref for Strong<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        match self.as_ref() {
            Some(value) => value,
            None => null_dereference::<T>(),
        }
    }
}

#[cold]
#[inline(never)]
fn null_dereference<T: ?Sized + 'static>() -> ! {
    panic!("{}", HeapError::null_dereference::<T>())
}

impl<T: ?Sized> PartialEq for Strong<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for Strong<T> {}

impl<T: ?Sized> PartialOrd for Strong<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized> Ord for Strong<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.addr().cmp(&other.addr())
    }
}

impl<T: ?Sized> Hash for Strong<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl<T: ?Sized> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Strong({})", self.describe())
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ref() {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}
