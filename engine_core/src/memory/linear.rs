//! A linear (bump) allocator: the cheapest allocator in the system, and the
//! one every frame-scoped arena (scratch, temporal graph resources) builds
//! on. No `free`; the whole arena is released at once via [`reset`](LinearAllocator::reset)
//! or by dropping it.

use core::cell::Cell;
use core::ptr::NonNull;

use engine_tracing::trace_span;

use super::heap::{AllocCapable, AllocError, FreeHeap};
use super::util::align_up;

/// A contiguous region carved out of a backing [`FreeHeap`] and handed out by
/// bumping a cursor forward. The cursor is always left aligned to the most
/// recent allocation's alignment, so a sequence of same-alignment allocations
/// never re-pays the alignment cost on the next call.
pub struct LinearAllocator<'a> {
    backing: FreeHeap<'a>,
    base: NonNull<u8>,
    capacity: usize,
    cursor: Cell<usize>,
}

impl<'a> LinearAllocator<'a> {
    pub fn new(backing: FreeHeap<'a>, capacity: usize) -> Result<Self, AllocError> {
        let base = backing.alloc(capacity, DEFAULT_ALIGN)?;
        Ok(Self { backing, base, capacity, cursor: Cell::new(0) })
    }

    /// Allocates `size` bytes aligned to `align` (must be a power of two).
    pub fn alloc_raw(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        let _span = trace_span!("linear::alloc_raw");
        if !align.is_power_of_two() {
            return Err(AllocError::InvalidAlignment);
        }

        let cursor = self.cursor.get();
        let aligned = align_up(cursor, align);
        let end = aligned.checked_add(size).ok_or(AllocError::OutOfMemory)?;
        if end > self.capacity {
            return Err(AllocError::OutOfMemory);
        }

        // Round the cursor itself up to `align` so a run of same-alignment
        // callers never pays leading padding again.
        let new_cursor = align_up(end, align);
        self.cursor.set(new_cursor.min(self.capacity).max(end));

        // SAFETY: `aligned + size <= capacity <= allocated buffer length`.
        let ptr = unsafe { self.base.as_ptr().add(aligned) };
        Ok(NonNull::new(ptr).expect("offset into a non-null base is non-null"))
    }

    /// Rewinds the cursor to the start, making the whole arena available
    /// again without touching the backing heap.
    pub fn reset(&self) {
        self.cursor.set(0);
    }

    /// Rewinds the cursor to a previously observed value. Used by
    /// [`super::context::ScratchAllocator`] to release a nested region.
    pub fn rewind_to(&self, cursor: usize) {
        debug_assert!(cursor <= self.cursor.get(), "cannot rewind a linear allocator forward");
        self.cursor.set(cursor);
    }

    pub fn cursor(&self) -> usize {
        self.cursor.get()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn base_ptr(&self) -> NonNull<u8> {
        self.base
    }
}

impl Drop for LinearAllocator<'_> {
    fn drop(&mut self) {
        // SAFETY: `base` was allocated from `backing` with `capacity` bytes
        // at `DEFAULT_ALIGN`, and is never accessed after this point.
        unsafe {
            self.backing.dealloc(self.base, self.capacity, DEFAULT_ALIGN);
        }
    }
}

impl AllocCapable for LinearAllocator<'_> {
    fn heap_alloc(&self, size: usize, align: usize) -> Result<NonNull<u8>, AllocError> {
        self.alloc_raw(size, align)
    }
}

const DEFAULT_ALIGN: usize = 16;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::os::OsAllocator;

    #[test]
    fn bump_offsets_match_seed_scenario() {
        let os = OsAllocator::new();
        let backing = os.as_free_heap();
        let arena = LinearAllocator::new(backing, 1024).unwrap();

        let a = arena.alloc_raw(300, 16).unwrap();
        let b = arena.alloc_raw(200, 16).unwrap();
        let c = arena.alloc_raw(100, 16).unwrap();

        let base = arena.base_ptr().as_ptr() as usize;
        assert_eq!(a.as_ptr() as usize - base, 0);
        assert_eq!(b.as_ptr() as usize - base, 304);
        assert_eq!(c.as_ptr() as usize - base, 512);
        assert_eq!(arena.cursor(), 624);

        arena.reset();
        assert_eq!(arena.cursor(), 0);

        let a2 = arena.alloc_raw(300, 16).unwrap();
        let b2 = arena.alloc_raw(200, 16).unwrap();
        let c2 = arena.alloc_raw(100, 16).unwrap();
        assert_eq!(a2.as_ptr() as usize - base, 0);
        assert_eq!(b2.as_ptr() as usize - base, 304);
        assert_eq!(c2.as_ptr() as usize - base, 512);
        assert_eq!(arena.cursor(), 624);
    }

    #[test]
    fn exhausted_arena_errors() {
        let os = OsAllocator::new();
        let arena = LinearAllocator::new(os.as_free_heap(), 64).unwrap();
        assert!(arena.alloc_raw(32, 16).is_ok());
        assert!(arena.alloc_raw(64, 16).is_err());
    }

    #[test]
    fn rejects_non_power_of_two_alignment() {
        let os = OsAllocator::new();
        let arena = LinearAllocator::new(os.as_free_heap(), 64).unwrap();
        assert_eq!(arena.alloc_raw(8, 3), Err(AllocError::InvalidAlignment));
    }
}
