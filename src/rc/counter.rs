//! Atomic strong counter
//!
//! Thread-safe atomic operations. The hot paths are a single read-modify-write
//! each; only the weak upgrade and the destruction commit need a CAS.

use std::sync::atomic::{fence, AtomicIsize, Ordering};

#[derive(Debug)]
#[repr(transparent)]
pub struct AtomicCounter(AtomicIsize);

impl AtomicCounter {
    #[inline]
    pub const fn new(value: isize) -> Self {
        Self(AtomicIsize::new(value))
    }

    #[inline]
    pub fn get(&self) -> isize {
        self.0.load(Ordering::Acquire)
    }

    /// Add one, returning the new value
    #[inline(always)]
    pub fn increment(&self) -> isize {
        let old = self.0.fetch_add(1, Ordering::Relaxed);
        debug_assert!(old < isize::MAX, "strong count overflow");
        old + 1
    }

    /// Subtract one, returning the new value
    ///
    /// Panics on underflow: a count below zero means some owner released
    /// twice and the object may already be freed.
    #[inline(always)]
    pub fn decrement(&self) -> isize {
        let old = self.0.fetch_sub(1, Ordering::Release);
        assert!(old > 0, "strong count underflow (double release)");

        if old == 1 {
            // Synchronize with all previous decrements
            fence(Ordering::Acquire);
        }
        old - 1
    }

    /// Add one only if the count is positive
    pub fn increment_if_positive(&self) -> Option<isize> {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            if current <= 0 {
                return None;
            }
            match self.0.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Some(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Swap `expected` for `new`, reporting whether the swap happened
    #[inline]
    pub fn transfer(&self, expected: isize, new: isize) -> bool {
        self.0
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
