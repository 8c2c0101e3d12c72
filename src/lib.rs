//! Managed Heap - intrusive reference counting with weak references
//!
//! Objects live in storage prefixed by a header holding their strong count
//! and weak ring. `Strong` handles own, `Weak` handles observe, and the last
//! release drives the object through `finalize`, which may resurrect it.
//! Strong cycles are not collected.
//!
//! ```ignore
//! use managed_heap::{create, Managed, Weak};
//!
//! struct Node { name: String }
//! impl Managed for Node {}
//!
//! let node = create(Node { name: "root".into() })?;
//! let weak = Weak::from_strong(&node)?;
//! drop(node);
//! assert!(weak.get().is_null());
//! ```

pub mod allocator;
pub mod array;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod identity;
pub mod logging;
pub mod object;
pub mod rc;

// Re-export core types
pub use allocator::{AllocatorStats, Lifecycle};
pub use array::{new_array, Array, ElementKind, PlainData};
pub use config::HeapConfig;
pub use diagnostics::{LeakGuard, LeakReport};
pub use error::{HeapError, Result};
pub use object::{create, create_via, Managed};
pub use rc::{Strong, Weak};

use tracing_appender::non_blocking::WorkerGuard;

/// Heap initialization
///
/// Installs `config` as the process-wide configuration and starts logging
/// from it. Keep the returned guard alive until shutdown.
///
/// Call this before creating the first managed object. Creating an object
/// reads the configuration, which fixes the defaults in place, and a later
/// `init` then fails with `HeapError::Config`.
pub fn init(config: HeapConfig) -> Result<Option<WorkerGuard>> {
    let log_config = config.log_config();
    config::install(config)?;
    Ok(logging::init_logging(log_config))
}
