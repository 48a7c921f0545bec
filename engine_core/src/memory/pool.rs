//! A pool allocator: fixed-size blocks handed out and reclaimed via an
//! intrusive free list threaded through the blocks themselves. Allocation
//! and free are both O(1) and never move memory, which makes pools the
//! allocator of choice for job-system bookkeeping (`JobCounter`s,
//! `WorkingJob`s, job stacks) where objects are recycled constantly.

use core::cell::Cell;
use core::marker::PhantomData;
use core::mem::size_of;
use core::ptr::NonNull;

use engine_tracing::trace_span;

use super::heap::{AllocCapable, AllocError, FreeHeap};

/// Byte-block pool: every block is `block_size` bytes, `block_align`
/// aligned. `block_size` must be at least `size_of::<usize>()` since a free
/// block's first bytes double as the intrusive next-pointer.
pub struct PoolAllocator<'a> {
    backing: FreeHeap<'a>,
    base: NonNull<u8>,
    block_size: usize,
    block_count: usize,
    free_head: Cell<Option<NonNull<u8>>>,
}

impl<'a> PoolAllocator<'a> {
    pub fn new(backing: FreeHeap<'a>, block_size: usize, block_align: usize, block_count: usize) -> Result<Self, AllocError> {
        let block_size = block_size.max(size_of::<usize>());
        if block_count == 0 {
            return Err(AllocError::OutOfMemory);
        }
        let total = block_size.checked_mul(block_count).ok_or(AllocError::OutOfMemory)?;
        let base = backing.alloc(total, block_align)?;

        let pool = Self { backing, base, block_size, block_count, free_head: Cell::new(None) };
        pool.relink_all_free();
        Ok(pool)
    }

    /// Threads every block into the free list, in address order. Called
    /// once at construction; exposed privately since re-linking a pool with
    /// live allocations out there would silently corrupt them.
    fn relink_all_free(&self) {
        let mut head: Option<NonNull<u8>> = None;
        for i in (0..self.block_count).rev() {
            // SAFETY: `i < block_count`, so this stays within the buffer.
            let block = unsafe { self.base.as_ptr().add(i * self.block_size) };
            let block = NonNull::new(block).expect("pool block offset is non-null");
            // SAFETY: the block is at least `size_of::<usize>()` bytes and
            // properly aligned; it is not yet shared with any caller.
            unsafe {
                block.cast::<Option<NonNull<u8>>>().as_ptr().write(head);
            }
            head = Some(block);
        }
        self.free_head.set(head);
    }

    pub fn alloc(&self) -> Result<NonNull<u8>, AllocError> {
        let _span = trace_span!("pool::alloc");
        let head = self.free_head.get().ok_or(AllocError::OutOfMemory)?;
        // SAFETY: `head` is a live free block; its first bytes hold the next
        // pointer written by `relink_all_free` or a prior `free`.
        let next = unsafe { head.cast::<Option<NonNull<u8>>>().as_ptr().read() };
        self.free_head.set(next);
        Ok(head)
    }

    /// # Safety
    ///
    /// `ptr` must have been returned by [`Self::alloc`] on this pool and not
    /// already freed.
    pub unsafe fn free(&self, ptr: NonNull<u8>) {
        let _span = trace_span!("pool::free");
        debug_assert!(self.owns(ptr), "pointer does not belong to this pool");
        let head = self.free_head.get();
        // SAFETY: caller guarantees `ptr` is a live allocation from this
        // pool, so it is writable and at least `size_of::<usize>()` bytes.
        unsafe {
            ptr.cast::<Option<NonNull<u8>>>().as_ptr().write(head);
        }
        self.free_head.set(Some(ptr));
    }

    fn owns(&self, ptr: NonNull<u8>) -> bool {
        let base = self.base.as_ptr() as usize;
        let addr = ptr.as_ptr() as usize;
        let end = base + self.block_size * self.block_count;
        addr >= base && addr < end && (addr - base) % self.block_size == 0
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }
}

impl Drop for PoolAllocator<'_> {
    fn drop(&mut self) {
        let total = self.block_size * self.block_count;
        // SAFETY: `base` was allocated from `backing` with this exact size
        // and alignment in `new`, and is never accessed after this point.
        unsafe {
            self.backing.dealloc(self.base, total, self.block_size);
        }
    }
}

impl AllocCapable for PoolAllocator<'_> {
    fn heap_alloc(&self, size: usize, _align: usize) -> Result<NonNull<u8>, AllocError> {
        if size > self.block_size {
            return Err(AllocError::BlockTooLarge);
        }
        self.alloc()
    }
}

/// A typed pool of `T`, built over [`PoolAllocator`]. Mirrors the source's
/// generic `PoolAllocator<T>` header: callers get back a live `&mut T`
/// instead of a raw block.
pub struct TypedPool<'a, T> {
    raw: PoolAllocator<'a>,
    _marker: PhantomData<T>,
}

impl<'a, T> TypedPool<'a, T> {
    pub fn new(backing: FreeHeap<'a>, capacity: usize) -> Result<Self, AllocError> {
        let raw = PoolAllocator::new(backing, size_of::<T>(), core::mem::align_of::<T>(), capacity)?;
        Ok(Self { raw, _marker: PhantomData })
    }

    pub fn alloc(&self, value: T) -> Result<NonNull<T>, AllocError> {
        let block = self.raw.alloc()?;
        let typed = block.cast::<T>();
        // SAFETY: `block` is a freshly allocated, uninitialized, properly
        // sized and aligned block owned by no one else.
        unsafe {
            typed.as_ptr().write(value);
        }
        Ok(typed)
    }

    /// # Safety
    ///
    /// `ptr` must have come from [`Self::alloc`] on this pool and not
    /// already been freed; the pointee is dropped in place.
    pub unsafe fn free(&self, ptr: NonNull<T>) {
        unsafe {
            ptr.as_ptr().drop_in_place();
            self.raw.free(ptr.cast());
        }
    }

    pub fn capacity(&self) -> usize {
        self.raw.block_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::os::OsAllocator;

    #[test]
    fn alloc_exhaustion_and_reuse() {
        let os = OsAllocator::new();
        let pool = PoolAllocator::new(os.as_free_heap(), 64, 8, 4).unwrap();

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        let _c = pool.alloc().unwrap();
        let _d = pool.alloc().unwrap();
        assert_eq!(pool.alloc(), Err(AllocError::OutOfMemory));

        unsafe { pool.free(b) };
        let f = pool.alloc().unwrap();
        assert_eq!(f, b);
        let _ = a;
    }

    #[test]
    fn typed_pool_roundtrip() {
        let os = OsAllocator::new();
        let pool: TypedPool<'_, u64> = TypedPool::new(os.as_free_heap(), 2).unwrap();
        let a = pool.alloc(42).unwrap();
        // SAFETY: just allocated.
        assert_eq!(unsafe { *a.as_ptr() }, 42);
        unsafe { pool.free(a) };
    }
}
