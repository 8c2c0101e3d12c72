//! Reference counting - strong and weak handles over managed objects
//!
//! Design: the count lives in the object header (intrusive), so a handle is
//! two pointers and cloning touches one atomic. Weak handles observe the
//! object through the weak ring and never hold it alive.

mod counter;
mod lifecycle;
pub(crate) mod ring;
mod strong;
mod weak;

#[cfg(test)]
mod tests;

pub use counter::AtomicCounter;
pub use strong::Strong;
pub use weak::Weak;

pub(crate) use ring::RingLink;
pub(crate) use strong::Target;
