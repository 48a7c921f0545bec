//! Heap "capability" handles.
//!
//! Every concrete allocator (linear, stack, pool, TLSF, OS) implements
//! [`AllocCapable`], and progressively richer ones also implement
//! [`FreeCapable`] and [`ReallocCapable`]. Call sites that only need to carve
//! out memory take an [`AllocHeap`]; call sites that also need to give memory
//! back take a [`FreeHeap`]; call sites that resize in place take a
//! [`ReallocFreeHeap`]. All three are thin, non-owning, type-erased
//! references, so a function taking an `AllocHeap` never knows or cares
//! whether the caller handed it a bump arena or a full TLSF heap.

use core::fmt;
use core::ptr::NonNull;

pub use crate::error::AllocError;

/// Can carve out memory but never give it back. Implemented by every
/// allocator, including purely linear ones that have no concept of `free`.
pub trait AllocCapable {
    fn heap_alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError>;
}

/// Can also release a previously allocated block.
pub trait FreeCapable: AllocCapable {
    /// # Safety
    ///
    /// `ptr` must have been returned by this same allocator's
    /// [`AllocCapable::heap_alloc`] with the same `size`/`align`, and must
    /// not be used again afterwards.
    unsafe fn heap_dealloc(&self, ptr: NonNull<u8>, size: usize, align: usize);
}

/// Can resize a block in place (or move it), rather than requiring an
/// alloc-copy-free dance at the call site.
pub trait ReallocCapable: FreeCapable {
    /// # Safety
    ///
    /// `ptr` must have been returned by this same allocator's
    /// [`AllocCapable::heap_alloc`] (or a prior `heap_realloc`) with
    /// `old_size`/`align`.
    unsafe fn heap_realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, AllocError>;
}

/// A borrowed, type-erased reference to anything that can allocate.
#[derive(Clone, Copy)]
pub struct AllocHeap<'a> {
    inner: &'a dyn AllocCapable,
}

impl<'a> AllocHeap<'a> {
    pub fn new(inner: &'a dyn AllocCapable) -> Self {
        Self { inner }
    }

    pub fn alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        self.inner.heap_alloc(size, align)
    }
}

impl fmt::Debug for AllocHeap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocHeap").finish_non_exhaustive()
    }
}

/// A borrowed, type-erased reference to anything that can allocate and free.
#[derive(Clone, Copy)]
pub struct FreeHeap<'a> {
    inner: &'a dyn FreeCapable,
}

impl<'a> FreeHeap<'a> {
    pub fn new(inner: &'a dyn FreeCapable) -> Self {
        Self { inner }
    }

    pub fn alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        self.inner.heap_alloc(size, align)
    }

    /// # Safety
    ///
    /// See [`FreeCapable::heap_dealloc`].
    pub unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        unsafe { self.inner.heap_dealloc(ptr, size, align) }
    }

    /// Downgrades to an [`AllocHeap`], forgetting the ability to free. Useful
    /// for passing a heap into code that should only ever grow an arena.
    pub fn as_alloc_heap(&self) -> AllocHeap<'a> {
        AllocHeap::new(self.inner)
    }
}

impl fmt::Debug for FreeHeap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeHeap").finish_non_exhaustive()
    }
}

/// A borrowed, type-erased reference to anything that can allocate, free,
/// and resize in place.
#[derive(Clone, Copy)]
pub struct ReallocFreeHeap<'a> {
    inner: &'a dyn ReallocCapable,
}

impl<'a> ReallocFreeHeap<'a> {
    pub fn new(inner: &'a dyn ReallocCapable) -> Self {
        Self { inner }
    }

    pub fn alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        self.inner.heap_alloc(size, align)
    }

    /// # Safety
    ///
    /// See [`FreeCapable::heap_dealloc`].
    pub unsafe fn dealloc(&self, ptr: NonNull<u8>, size: usize, align: usize) {
        unsafe { self.inner.heap_dealloc(ptr, size, align) }
    }

    /// # Safety
    ///
    /// See [`ReallocCapable::heap_realloc`].
    pub unsafe fn realloc(
        &self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        align: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        unsafe { self.inner.heap_realloc(ptr, old_size, new_size, align) }
    }

    pub fn as_free_heap(&self) -> FreeHeap<'a> {
        FreeHeap::new(self.inner)
    }

    pub fn as_alloc_heap(&self) -> AllocHeap<'a> {
        AllocHeap::new(self.inner)
    }
}

impl fmt::Debug for ReallocFreeHeap<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReallocFreeHeap").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::os::OsAllocator;

    #[test]
    fn capability_narrowing_compiles_and_runs() {
        let os = OsAllocator::new();
        let free = os.as_free_heap();
        let alloc = free.as_alloc_heap();
        let ptr = alloc.alloc(64, 8).unwrap();
        unsafe {
            free.dealloc(ptr, 64, 8);
        }
    }
}
