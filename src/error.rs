//! Error conditions surfaced by the heap
//!
//! Every variant is a local, synchronous condition raised at the point of
//! misuse. Nothing here is retried internally. Double release and retain from
//! zero are not errors: they abort through a panic because they mean the
//! counts no longer describe reality.

use crate::identity;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = HeapError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    /// Dereferencing an empty strong handle
    #[error("the current '{type_name}' reference is null so it cannot be dereferenced")]
    NullDereference { type_name: String },

    /// Weak reference requested for an object with no strong owners
    #[error("the target '{type_name}' has not been assigned to a strong reference before")]
    InvalidWeakTarget { type_name: String },

    /// Validated upgrade of a weak reference whose target is gone
    #[error("no target of current Weak<{type_name}>")]
    AbsentTarget { type_name: String },

    #[error("invalid range [{start}, {end}) for an array of length {length}")]
    InvalidRange { start: i64, end: i64, length: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Array element access outside `[0, length)`
    #[error("array index {index} is out of range for length {length}")]
    IndexOutOfRange { index: usize, length: usize },

    #[error("cannot allocate {size} bytes for '{type_name}'")]
    AllocationFailed { type_name: String, size: usize },

    /// Raised by a type's `initialize` hook
    #[error("initialization of '{type_name}' failed: {reason}")]
    Initialization { type_name: String, reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl HeapError {
    pub fn null_dereference<T: ?Sized + 'static>() -> Self {
        Self::NullDereference {
            type_name: identity::display_name_of::<T>().to_string(),
        }
    }

    pub fn invalid_weak_target<T: ?Sized + 'static>() -> Self {
        Self::InvalidWeakTarget {
            type_name: identity::display_name_of::<T>().to_string(),
        }
    }

    pub fn absent_target<T: ?Sized + 'static>() -> Self {
        Self::AbsentTarget {
            type_name: identity::display_name_of::<T>().to_string(),
        }
    }

    /// Failure reported from `Managed::initialize`
    pub fn initialization<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::Initialization {
            type_name: identity::display_name_of::<T>().to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
