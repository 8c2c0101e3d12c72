//! Managed arrays - fixed-length element storage sharing the object header
//!
//! Design: one allocation holds the header, the `Array` descriptor and the
//! elements, in that order. Length and element kind never change after
//! creation.
//!
//! Element kinds:
//! - `Opaque`: every element is constructed (clone or `Default`) left to
//!   right and dropped right to left
//! - `RawZeroed`: bulk copy from a source, or zero fill
//! - `Raw`: bulk copy from a source; without one the storage is zero filled
//!   as well, since uninitialized memory cannot be read safely


use crate::allocator::{self, Lifecycle, ObjectHeader, ObjectVTable, RawSlot};
use crate::diagnostics;
use crate::error::{HeapError, Result};
use crate::identity::TypeIdentity;
use crate::object;
use crate::rc::Strong;
use core::fmt;
use core::marker::PhantomData;
use core::ops::Index;
use core::ptr::{self, NonNull};
use core::slice;
use std::alloc::Layout;

/// How an array's elements are initialized and destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Opaque,
    RawZeroed,
    Raw,
}

/// Element types that may be bulk copied and zero filled
///
/// # Safety
/// The all-zero bit pattern must be a valid value of the type.
pub unsafe trait PlainData: Copy + Default + Send + Sync + 'static {}

macro_rules! impl_plain_data {
    ($($ty:ty),* $(,)?) => {
        $(unsafe impl PlainData for $ty {})*
    };
}

impl_plain_data!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64, bool, char);

/// Fixed-length managed array
#[repr(C)]
pub struct Array<E> {
    len: usize,
    kind: ElementKind,
    data: NonNull<E>,
    _owns: PhantomData<E>,
}

unsafe impl<E: Send + Sync> Send for Array<E> {}
unsafe impl<E: Send + Sync> Sync for Array<E> {}

/// Header followed by the array descriptor; elements come after
#[repr(C)]
struct ArraySlot<E> {
    header: ObjectHeader,
    array: Array<E>,
}

/// Allocation layout for `len` elements and the offset of the first one
fn slot_layout<E>(len: usize) -> Result<(Layout, usize)> {
    let too_large = |_| HeapError::invalid_argument(format!("array of {} elements is too large", len));
    let elements = Layout::array::<E>(len).map_err(too_large)?;
    let (layout, offset) = Layout::new::<ArraySlot<E>>()
        .extend(elements)
        .map_err(too_large)?;
    Ok((layout.pad_to_align(), offset))
}

fn checked_length(length: i64) -> Result<usize> {
    usize::try_from(length)
        .map_err(|_| HeapError::invalid_argument(format!("array length {} is negative", length)))
}

fn check_source<E>(len: usize, source: Option<&[E]>) -> Result<()> {
    match source {
        Some(items) if items.len() < len => Err(HeapError::invalid_argument(format!(
            "source holds {} elements, {} required",
            items.len(),
            len
        ))),
        _ => Ok(()),
    }
}

/// Drops the initialized prefix if element construction unwinds
struct PartialInit<E> {
    data: *mut E,
    initialized: usize,
}

impl<E> Drop for PartialInit<E> {
    fn drop(&mut self) {
        for i in (0..self.initialized).rev() {
            unsafe { ptr::drop_in_place(self.data.add(i)) };
        }
    }
}

/// Move up to `len` items into `data`, in order. Returns how many were written.
unsafe fn fill<E>(data: *mut E, len: usize, items: impl Iterator<Item = E>) -> usize {
    let mut guard = PartialInit { data, initialized: 0 };
    for item in items.take(len) {
        data.add(guard.initialized).write(item);
        guard.initialized += 1;
    }
    let written = guard.initialized;
    core::mem::forget(guard);
    written
}

/// Allocate, initialize and export an array of `len` elements
///
/// `init` must initialize exactly `len` elements at the given pointer and may
/// unwind only after dropping what it built.
fn build<E, F>(len: usize, kind: ElementKind, init: F) -> Result<Strong<Array<E>>>
where
    E: Send + Sync + 'static,
    F: FnOnce(*mut E),
{
    let (layout, offset) = slot_layout::<E>(len)?;
    let raw = RawSlot::allocate(layout, TypeIdentity::of::<Array<E>>())?;
    let slot = raw.header_ptr().cast::<ArraySlot<E>>();

    let header = unsafe {
        ObjectHeader::init_in_place(ptr::addr_of_mut!((*slot).header), &ArrayOps::<E>::VTABLE);

        let data = raw.as_ptr().add(offset).cast::<E>();
        init(data);

        ptr::addr_of_mut!((*slot).array).write(Array {
            len,
            kind,
            data: NonNull::new_unchecked(data),
            _owns: PhantomData,
        });
        raw.commit()
    };
    unsafe { header.as_ref() }.set_state(Lifecycle::Constructed);
    diagnostics::on_construct();

    let array = unsafe { Strong::adopt(header, ObjectHeader::value_ptr::<Array<E>>(header)) };
    object::export(header);
    Ok(array)
}

/// Create an array of plain data elements
///
/// `source`, when given, must hold at least `length` elements.
pub fn new_array<E: PlainData>(
    length: i64,
    kind: ElementKind,
    source: Option<&[E]>,
) -> Result<Strong<Array<E>>> {
    Array::new_instance(length, kind, source)
}

impl<E: PlainData> Array<E> {
    pub fn new_instance(length: i64, kind: ElementKind, source: Option<&[E]>) -> Result<Strong<Self>> {
        let len = checked_length(length)?;
        check_source(len, source)?;

        match kind {
            ElementKind::Opaque => Self::new_opaque(length, source),
            ElementKind::RawZeroed | ElementKind::Raw => build(len, kind, |data| unsafe {
                match source {
                    Some(items) => ptr::copy_nonoverlapping(items.as_ptr(), data, len),
                    None => ptr::write_bytes(data, 0, len),
                }
            }),
        }
    }

    /// Zero-filled array without per-element construction
    pub fn new_plain(length: i64, zeroed: bool) -> Result<Strong<Self>> {
        let kind = if zeroed { ElementKind::RawZeroed } else { ElementKind::Raw };
        Self::new_instance(length, kind, None)
    }

    /// Bulk copy of `items`
    pub fn of_plain(items: &[E]) -> Result<Strong<Self>> {
        Self::new_instance(items.len() as i64, ElementKind::RawZeroed, Some(items))
    }
}

impl<E: Clone + Default + Send + Sync + 'static> Array<E> {
    /// Elements cloned from `source`, or `Default` when there is none
    pub fn new_opaque(length: i64, source: Option<&[E]>) -> Result<Strong<Self>> {
        let len = checked_length(length)?;
        check_source(len, source)?;

        build(len, ElementKind::Opaque, |data| unsafe {
            match source {
                Some(items) => fill(data, len, items.iter().cloned()),
                None => fill(data, len, core::iter::repeat_with(E::default)),
            };
        })
    }
}

impl<E: Send + Sync + 'static> Array<E> {
    /// Move `items` into a new array
    pub fn of(items: impl IntoIterator<Item = E>) -> Result<Strong<Self>> {
        let items: Vec<E> = items.into_iter().collect();
        let len = items.len();

        build(len, ElementKind::Opaque, |data| unsafe {
            fill(data, len, items.into_iter());
        })
    }

    /// New array holding clones of `[start, end)`
    ///
    /// Both bounds are literal: `end = -1` is rejected, use `clone_all` to copy
    /// through the end.
    pub fn clone_range(&self, start: i64, end: i64) -> Result<Strong<Self>>
    where
        E: Clone,
    {
        let in_bounds = 0 <= start && start <= end && end <= self.len as i64;
        if !in_bounds {
            return Err(HeapError::InvalidRange {
                start,
                end,
                length: self.len,
            });
        }

        let range = &self.as_slice()[start as usize..end as usize];
        let len = range.len();
        build(len, self.kind, |data| unsafe {
            fill(data, len, range.iter().cloned());
        })
    }

    pub fn clone_all(&self) -> Result<Strong<Self>>
    where
        E: Clone,
    {
        self.clone_range(0, self.len as i64)
    }
}

impl<E> Array<E> {
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    #[inline]
    pub fn as_slice(&self) -> &[E] {
        unsafe { slice::from_raw_parts(self.data.as_ptr(), self.len) }
    }

    /// Reachable only through `Strong::get_mut`
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [E] {
        unsafe { slice::from_raw_parts_mut(self.data.as_ptr(), self.len) }
    }

    pub fn iter(&self) -> slice::Iter<'_, E> {
        self.as_slice().iter()
    }

    /// Bounds-checked element access
    pub fn at(&self, index: usize) -> Result<&E> {
        self.as_slice().get(index).ok_or(HeapError::IndexOutOfRange {
            index,
            length: self.len,
        })
    }

    /// # Safety
    /// `index` must be below `len()`.
    #[inline]
    pub unsafe fn get_unchecked(&self, index: usize) -> &E {
        debug_assert!(index < self.len, "array index {} out of range for length {}", index, self.len);
        &*self.data.as_ptr().add(index)
    }
}

impl<E> Index<usize> for Array<E> {
    type Output = E;

    fn index(&self, index: usize) -> &E {
        match self.at(index) {
            Ok(element) => element,
            Err(err) => panic!("{}", err),
        }
    }
}

impl<'a, E> IntoIterator for &'a Array<E> {
    type Item = &'a E;
    type IntoIter = slice::Iter<'a, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<E: fmt::Debug> fmt::Debug for Array<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<E: fmt::Display> fmt::Display for Array<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, element) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            fmt::Display::fmt(element, f)?;
        }
        f.write_str("]")
    }
}

impl<E> Strong<Array<E>> {
    /// Element count, 0 for a null handle
    pub fn length(&self) -> usize {
        self.as_ref().map_or(0, Array::len)
    }

    /// Mutable elements while this handle is the sole owner
    pub fn as_mut_slice(&mut self) -> Option<&mut [E]> {
        self.get_mut().map(Array::as_mut_slice)
    }
}

/// Static operations table for `Array<E>`
struct ArrayOps<E>(PhantomData<E>);

impl<E: Send + Sync + 'static> ArrayOps<E> {
    const VTABLE: ObjectVTable = ObjectVTable {
        identity: TypeIdentity::of::<Array<E>>,
        finalize: Self::finalize,
        resurrect: Self::resurrect,
        destroy: Self::destroy,
    };

    unsafe fn finalize(_header: NonNull<ObjectHeader>) {}

    unsafe fn resurrect(_header: NonNull<ObjectHeader>) {}

    unsafe fn destroy(header: NonNull<ObjectHeader>) {
        let array = ObjectHeader::value_ptr::<Array<E>>(header).as_ptr();
        let len = (*array).len;
        let data = (*array).data.as_ptr();

        for i in (0..len).rev() {
            ptr::drop_in_place(data.add(i));
        }

        // Length was validated when the array was built
        if let Ok((layout, _)) = slot_layout::<E>(len) {
            allocator::free(header.cast(), layout);
        }
    }
}
