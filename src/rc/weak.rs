//! Weak handle - observes a managed object without owning it
//!
//! A weak reference can only be taken while the object has a strong owner.
//! When destruction commits, every weak reference to the object is nulled in
//! the same critical section, so an upgrade either wins a strong reference or
//! sees null. It never sees freed memory.

use crate::allocator::ObjectHeader;
use crate::error::{HeapError, Result};
use crate::object::Managed;
use crate::rc::ring::{self, RegistryGuard, WeakNode};
use crate::rc::{Strong, Target};
use core::fmt;
use core::ptr::NonNull;

pub struct Weak<T: ?Sized> {
    node: Box<WeakNode>,
    value: Option<NonNull<T>>,
}

unsafe impl<T: ?Sized + Send + Sync> Send for Weak<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for Weak<T> {}

impl<T: ?Sized> Weak<T> {
    /// Null weak reference
    pub fn new() -> Self {
        Self {
            node: WeakNode::new(),
            value: None,
        }
    }

    pub fn from_strong(strong: &Strong<T>) -> Result<Self>
    where
        T: 'static,
    {
        let mut weak = Self::new();
        weak.assign(strong)?;
        Ok(weak)
    }

    /// Observe `strong`'s object instead of the current one
    ///
    /// Fails with `InvalidWeakTarget` if the object has no strong owner left.
    pub fn assign(&mut self, strong: &Strong<T>) -> Result<()>
    where
        T: 'static,
    {
        let registry = ring::lock_registry();
        self.relink(strong.target(), &registry)
    }

    /// Observe whatever `other` observes
    pub fn assign_weak(&mut self, other: &Weak<T>) {
        let registry = ring::lock_registry();
        let target = match (other.node.target(&registry), other.value) {
            (Some(header), Some(value)) => Some(Target { header, value }),
            _ => None,
        };
        if self.relink_live(target, &registry).is_err() {
            // Committed for destruction: the copy starts out expired
            self.unlink(&registry);
        }
    }

    pub fn clear(&mut self) {
        let registry = ring::lock_registry();
        self.unlink(&registry);
    }

    /// Upgrade to a strong reference, null if the object is gone
    pub fn get(&self) -> Strong<T> {
        let registry = ring::lock_registry();
        let (Some(header), Some(value)) = (self.node.target(&registry), self.value) else {
            return Strong::null();
        };

        // Count already zero: destruction committed, invalidation pending
        if unsafe { header.as_ref() }.strong.increment_if_positive().is_none() {
            return Strong::null();
        }
        drop(registry);

        unsafe { Strong::adopt(header, value) }
    }

    /// Upgrade, failing with `AbsentTarget` if the object is gone
    pub fn get_checked(&self) -> Result<Strong<T>>
    where
        T: 'static,
    {
        let strong = self.get();
        if strong.is_null() {
            Err(HeapError::absent_target::<T>())
        } else {
            Ok(strong)
        }
    }

    pub fn is_expired(&self) -> bool {
        let registry = ring::lock_registry();
        match self.node.target(&registry) {
            Some(header) => unsafe { header.as_ref() }.strong_count() <= 0,
            None => true,
        }
    }

    /// Whether this observes `strong`'s object
    pub fn points_to(&self, strong: &Strong<T>) -> bool {
        self.addr() == strong.addr()
    }

    /// Address of the observed object, 0 once invalidated
    pub fn addr(&self) -> usize {
        let registry = ring::lock_registry();
        self.node
            .target(&registry)
            .map_or(0, |header| header.as_ptr() as usize)
    }

    fn unlink(&mut self, registry: &RegistryGuard) {
        self.node.detach(registry);
        self.value = None;
    }

    fn relink(&mut self, target: Option<Target<T>>, registry: &RegistryGuard) -> Result<()>
    where
        T: 'static,
    {
        self.relink_live(target, registry)
            .map_err(|_| HeapError::invalid_weak_target::<T>())
    }

    /// Unlink from the current ring and link into `target`'s
    ///
    /// Leaves the handle untouched and returns `Err` if `target` has no
    /// strong owner. If that is only discovered at the splice, the handle
    /// ends up null.
    fn relink_live(
        &mut self,
        target: Option<Target<T>>,
        registry: &RegistryGuard,
    ) -> core::result::Result<(), ()> {
        let current = self.node.target(registry);
        if current.map(NonNull::as_ptr) == target.map(|t| t.header.as_ptr()) {
            return Ok(());
        }

        if let Some(t) = target {
            if unsafe { t.header.as_ref() }.strong_count() <= 0 {
                return Err(());
            }
        }

        self.unlink(registry);
        if let Some(t) = target {
            // Destruction may commit between the check above and the splice
            if !unsafe { self.node.attach(t.header, registry) } {
                return Err(());
            }
            self.value = Some(t.value);
        }
        Ok(())
    }
}

impl<T: Managed> Weak<T> {
    /// Weak reference to an object from inside its storage
    ///
    /// # Safety
    /// `value` must live inside managed storage created by this crate.
    pub unsafe fn from_object(value: &T) -> Result<Self> {
        let target = Target {
            header: ObjectHeader::from_value(value as *const T),
            value: NonNull::from(value),
        };
        let mut weak = Self::new();
        let registry = ring::lock_registry();
        weak.relink(Some(target), &registry)?;
        drop(registry);
        Ok(weak)
    }
}

impl<T: ?Sized> Default for Weak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for Weak<T> {
    fn clone(&self) -> Self {
        let mut weak = Self::new();
        weak.assign_weak(self);
        weak
    }
}

impl<T: ?Sized> Drop for Weak<T> {
    fn drop(&mut self) {
        let registry = ring::lock_registry();
        self.node.detach(&registry);
    }
}

impl<T: ?Sized> PartialEq for Weak<T> {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl<T: ?Sized> Eq for Weak<T> {}

impl<T: ?Sized> PartialEq<Strong<T>> for Weak<T> {
    fn eq(&self, other: &Strong<T>) -> bool {
        self.points_to(other)
    }
}

impl<T: ?Sized> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Weak({})", self.get().describe())
    }
}

impl<T: ?Sized + fmt::Display> fmt::Display for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let strong = self.get();
        match strong.as_ref() {
            Some(value) => write!(f, "Weak({})", value),
            None => f.write_str("Weak(null)"),
        }
    }
}
