//! Bridges a borrowed [`FreeHeap`] into `allocator_api2::alloc::Allocator`,
//! so ordinary growable collections can be built directly over one of this
//! crate's allocators instead of the process-global allocator. Mirrors the
//! pattern of building command and resource-access buffers over a per-frame
//! arena rather than the system heap.

use core::alloc::Layout;
use core::ptr::NonNull;

use allocator_api2::alloc::{AllocError as Api2AllocError, Allocator};

use crate::memory::FreeHeap;

// SAFETY: `FreeHeap::alloc`/`FreeHeap::dealloc` forward to a single
// allocator for the handle's whole lifetime, matching the contract
// `Allocator` requires (allocations from one instance must be deallocatable
// by any other instance that compares equal — here, trivially, the same
// borrowed heap).
unsafe impl Allocator for FreeHeap<'_> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, Api2AllocError> {
        let size = layout.size().max(1);
        let ptr = self.alloc(size, layout.align()).map_err(|_| Api2AllocError)?;
        Ok(NonNull::slice_from_raw_parts(ptr, size))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let size = layout.size().max(1);
        // SAFETY: caller guarantees `ptr`/`layout` match a prior `allocate`
        // call on this same heap.
        unsafe { self.dealloc(ptr, size, layout.align()) };
    }
}

/// A `Vec` whose backing storage comes from a borrowed [`FreeHeap`] rather
/// than the global allocator.
pub type CapVec<'a, T> = allocator_api2::vec::Vec<T, FreeHeap<'a>>;

/// A `HashMap` whose backing storage comes from a borrowed [`FreeHeap`].
pub type CapHashMap<'a, K, V> = hashbrown::HashMap<K, V, hashbrown::DefaultHashBuilder, FreeHeap<'a>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::os::OsAllocator;

    #[test]
    fn cap_vec_grows_over_a_borrowed_heap() {
        let os = OsAllocator::new();
        let heap = os.as_free_heap();
        let mut v: CapVec<'_, u32> = CapVec::new_in(heap);
        for i in 0..256 {
            v.push(i);
        }
        assert_eq!(v.len(), 256);
        assert_eq!(v[255], 255);
    }

    #[test]
    fn cap_hash_map_over_a_borrowed_heap() {
        let os = OsAllocator::new();
        let heap = os.as_free_heap();
        let mut m: CapHashMap<'_, u32, &'static str> = CapHashMap::new_in(heap);
        m.insert(1, "a");
        m.insert(2, "b");
        assert_eq!(m.get(&1), Some(&"a"));
    }
}
