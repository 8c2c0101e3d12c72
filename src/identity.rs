//! Type identity cache - human readable type names for diagnostics
//!
//! Names are computed once per concrete type and memoized for the lifetime of
//! the process. Lookups vastly outnumber insertions, so the map sits behind a
//! read-mostly lock: shared lookup first, exclusive insert with a re-check on
//! miss. Entries are never evicted.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Path roots shortened to their last segment in display names
const STD_ROOTS: [&str; 3] = ["core", "alloc", "std"];

static TYPE_NAMES: Lazy<RwLock<HashMap<TypeId, Arc<str>>>> =
    Lazy::new(|| RwLock::new(HashMap::with_capacity(64)));

/// Runtime identity of a type
#[derive(Clone, Copy)]
pub struct TypeIdentity {
    id: TypeId,
    raw_name: &'static str,
}

impl TypeIdentity {
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            raw_name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Compiler-provided name, fully qualified
    #[inline]
    pub fn raw_name(&self) -> &'static str {
        self.raw_name
    }

    pub fn display_name(&self) -> Arc<str> {
        name_of(*self)
    }
}

impl PartialEq for TypeIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeIdentity {}

impl Hash for TypeIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypeIdentity").field(&self.raw_name).finish()
    }
}

/// Display name for a type identity, computed on first use
pub fn name_of(identity: TypeIdentity) -> Arc<str> {
    if let Some(name) = TYPE_NAMES.read().get(&identity.id) {
        return Arc::clone(name);
    }

    let mut names = TYPE_NAMES.write();
    // Another thread may have won the race between the two locks
    if let Some(name) = names.get(&identity.id) {
        return Arc::clone(name);
    }

    let name: Arc<str> = Arc::from(shorten(identity.raw_name));
    names.insert(identity.id, Arc::clone(&name));
    name
}

#[inline]
pub fn display_name_of<T: ?Sized + 'static>() -> Arc<str> {
    name_of(TypeIdentity::of::<T>())
}

/// Number of distinct types named so far
pub fn cached_type_count() -> usize {
    TYPE_NAMES.read().len()
}

/// Shorten standard library paths: `alloc::vec::Vec<app::Node>` becomes
/// `Vec<app::Node>`. User paths are kept intact.
fn shorten(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut path = String::new();
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_alphanumeric() || c == '_' {
            path.push(c);
        } else if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            path.push_str("::");
        } else {
            flush_path(&mut out, &mut path);
            out.push(c);
        }
    }
    flush_path(&mut out, &mut path);

    out
}

fn flush_path(out: &mut String, path: &mut String) {
    if path.is_empty() {
        return;
    }

    let root = path.split("::").next().unwrap_or_default();
    if STD_ROOTS.contains(&root) && path.contains("::") {
        out.push_str(path.rsplit("::").next().unwrap_or(path.as_str()));
    } else {
        out.push_str(path);
    }
    path.clear();
}
