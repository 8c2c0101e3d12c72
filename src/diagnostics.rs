//! Leak monitor - counts of objects that were created and never destroyed
//!
//! Compiled in for debug builds and for any build with the `leak-monitor`
//! feature. Elsewhere every hook is a no-op and reports are always clean.
//!
//! Strong cycles are never reclaimed, so this is how they show up.

use crate::config;
use crate::identity::TypeIdentity;
use crate::logging::log_leak_report;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::atomic::{AtomicIsize, Ordering};
use std::sync::Arc;

/// Whether the monitor is compiled in
pub const ENABLED: bool = cfg!(any(debug_assertions, feature = "leak-monitor"));

static MONITOR: Lazy<LeakMonitor> = Lazy::new(LeakMonitor::new);

struct LeakMonitor {
    live_objects: AtomicIsize,
    outstanding: DashMap<Arc<str>, usize>,
}

impl LeakMonitor {
    fn new() -> Self {
        Self {
            live_objects: AtomicIsize::new(0),
            outstanding: DashMap::new(),
        }
    }
}

#[inline]
fn tracking() -> bool {
    ENABLED && config::current().diagnostics.track_leaks
}

/// A value was placed in managed storage
#[inline]
pub(crate) fn on_construct() {
    if tracking() {
        MONITOR.live_objects.fetch_add(1, Ordering::Relaxed);
    }
}

pub(crate) fn on_export(identity: TypeIdentity) {
    if tracking() {
        *MONITOR.outstanding.entry(identity.display_name()).or_insert(0) += 1;
    }
}

pub(crate) fn on_destroy(identity: TypeIdentity) {
    if !tracking() {
        return;
    }

    MONITOR.live_objects.fetch_sub(1, Ordering::Relaxed);
    if let Entry::Occupied(mut entry) = MONITOR.outstanding.entry(identity.display_name()) {
        *entry.get_mut() -= 1;
        if *entry.get() == 0 {
            entry.remove();
        }
    }
}

/// Objects constructed and not destroyed yet
pub fn live_objects() -> isize {
    MONITOR.live_objects.load(Ordering::Relaxed)
}

/// Live exported objects of the type with this display name
pub fn outstanding(type_name: &str) -> usize {
    MONITOR.outstanding.get(type_name).map_or(0, |count| *count)
}

pub fn outstanding_of<T: ?Sized + 'static>() -> usize {
    outstanding(&crate::identity::display_name_of::<T>())
}

/// Snapshot of the monitor, logged as it is taken
pub fn report() -> LeakReport {
    let mut by_type: Vec<(String, usize)> = MONITOR
        .outstanding
        .iter()
        .map(|entry| (entry.key().to_string(), *entry.value()))
        .filter(|(_, count)| *count > 0)
        .collect();
    by_type.sort();

    let report = LeakReport {
        live_objects: live_objects(),
        by_type,
    };
    log_leak_report(&report);
    report
}

/// Outstanding objects at one point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeakReport {
    pub live_objects: isize,
    /// Display name and count, sorted by name
    pub by_type: Vec<(String, usize)>,
}

impl LeakReport {
    pub fn is_clean(&self) -> bool {
        self.live_objects == 0 && self.by_type.is_empty()
    }
}

impl fmt::Display for LeakReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_clean() {
            return write!(f, "All the objects are deleted");
        }

        write!(f, "{} object(s) still alive", self.live_objects)?;
        for (type_name, count) in &self.by_type {
            write!(f, "\n{} '{}' object(s) still alive", count, type_name)?;
        }
        Ok(())
    }
}

/// Reports outstanding objects when dropped, typically at the end of `main`
#[must_use = "the report runs when the guard is dropped"]
#[derive(Debug, Default)]
pub struct LeakGuard {
    _private: (),
}

impl LeakGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Drop for LeakGuard {
    fn drop(&mut self) {
        if ENABLED && config::current().diagnostics.report_on_exit {
            report();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_display() {
        let clean = LeakReport {
            live_objects: 0,
            by_type: Vec::new(),
        };
        assert!(clean.is_clean());
        assert_eq!(clean.to_string(), "All the objects are deleted");

        let leaky = LeakReport {
            live_objects: 3,
            by_type: vec![("app::Node".to_string(), 2), ("app::Tree".to_string(), 1)],
        };
        assert!(!leaky.is_clean());
        assert_eq!(
            leaky.to_string(),
            "3 object(s) still alive\n2 'app::Node' object(s) still alive\n1 'app::Tree' object(s) still alive"
        );
    }

    #[test]
    fn test_unknown_type_has_no_outstanding() {
        assert_eq!(outstanding("never::Created"), 0);
    }
}
