//! Raw views of mapped memory.

use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;

/// A raw `(ptr, len)` view of a memory region.
///
/// `Region` does not own its memory. The owner (an [`crate::ShmSegment`] or a
/// [`HeapRegion`]) must outlive every `Region` handed out.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: Region is a plain pointer + length. Every access through it goes
// through the ring protocol, which provides the synchronisation.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}

impl Region {
    /// Create a region from a raw pointer.
    ///
    /// # Safety
    ///
    /// `base` must be valid for reads and writes of `len` bytes for as long as
    /// the region (or any copy of it) is used.
    pub unsafe fn from_raw(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Pointer to the byte at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if `offset` is past the end of the region.
    #[inline]
    pub fn offset(&self, offset: usize) -> *mut u8 {
        assert!(offset <= self.len, "offset out of bounds");
        // SAFETY: offset is within the region.
        unsafe { self.base.as_ptr().add(offset) }
    }

    /// Shared reference to a `T` at `offset`.
    ///
    /// # Safety
    ///
    /// A valid `T` must live at `offset`, suitably aligned, and must not be
    /// mutated through a non-atomic path while the reference is alive.
    #[inline]
    pub unsafe fn get<T>(&self, offset: usize) -> &T {
        debug_assert!(offset + size_of::<T>() <= self.len);
        debug_assert!((self.base.as_ptr() as usize + offset) % align_of::<T>() == 0);
        unsafe { &*(self.offset(offset) as *const T) }
    }

    /// Exclusive reference to a `T` at `offset`.
    ///
    /// # Safety
    ///
    /// As for [`Region::get`], and no other reference to that `T` may exist.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut<T>(&self, offset: usize) -> &mut T {
        debug_assert!(offset + size_of::<T>() <= self.len);
        debug_assert!((self.base.as_ptr() as usize + offset) % align_of::<T>() == 0);
        unsafe { &mut *(self.offset(offset) as *mut T) }
    }
}

/// Zeroed heap memory standing in for a mapping, for in-process use.
pub struct HeapRegion {
    base: NonNull<u8>,
    layout: Layout,
}

// SAFETY: HeapRegion owns its allocation; access is coordinated by its users.
unsafe impl Send for HeapRegion {}
unsafe impl Sync for HeapRegion {}

impl HeapRegion {
    /// Page-ish alignment, matching what a mapping would give.
    const ALIGN: usize = 64;

    /// Allocate `len` zeroed bytes.
    ///
    /// # Panics
    ///
    /// Panics if `len` is zero or the allocation fails.
    pub fn new_zeroed(len: usize) -> Self {
        assert!(len > 0, "region must not be empty");
        let layout = Layout::from_size_align(len, Self::ALIGN).expect("invalid region layout");
        // SAFETY: layout has non-zero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        let base = NonNull::new(ptr).unwrap_or_else(|| std::alloc::handle_alloc_error(layout));
        Self { base, layout }
    }

    /// A view of the whole allocation.
    pub fn region(&self) -> Region {
        // SAFETY: the allocation is valid for layout.size() bytes while self lives.
        unsafe { Region::from_raw(self.base, self.layout.size()) }
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        // SAFETY: base was allocated with this layout.
        unsafe { dealloc(self.base.as_ptr(), self.layout) }
    }
}
