//! The OS page allocator (component A): the only ultimate source of memory.
//!
//! Every other allocator in [`crate::memory`] either operates over a buffer
//! reserved here, or is itself backed by a [`FreeHeap`](super::heap::FreeHeap)
//! that bottoms out here.

use core::ptr::NonNull;

use engine_tracing::trace_span;

use super::heap::{AllocCapable, AllocError, FreeCapable, FreeHeap};

/// Reserves and commits `size` bytes of zeroed virtual memory from the OS.
///
/// Returns `None` if the OS refuses the mapping (address space exhaustion).
pub fn reserve_commit_pages(size: usize) -> Option<*mut u8> {
    let _span = trace_span!("os::reserve_commit_pages").entered();
    if size == 0 {
        return None;
    }

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Memory::{
            VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE,
        };

        let ptr = unsafe { VirtualAlloc(core::ptr::null(), size, MEM_COMMIT | MEM_RESERVE, PAGE_READWRITE) };
        if ptr.is_null() {
            None
        } else {
            Some(ptr.cast())
        }
    }

    #[cfg(unix)]
    {
        let ptr = unsafe {
            libc::mmap(
                core::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            None
        } else {
            Some(ptr.cast())
        }
    }
}

/// Releases a mapping previously returned by [`reserve_commit_pages`].
///
/// # Safety
///
/// `ptr` must be a pointer previously returned by [`reserve_commit_pages`]
/// with the same `size`, and must not be accessed again afterwards.
pub unsafe fn free_pages(ptr: *mut u8, #[cfg_attr(windows, allow(unused_variables))] size: usize) {
    let _span = trace_span!("os::free_pages").entered();

    #[cfg(windows)]
    {
        use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};
        unsafe {
            VirtualFree(ptr.cast(), 0, MEM_RELEASE);
        }
    }

    #[cfg(unix)]
    {
        unsafe {
            libc::munmap(ptr.cast(), size);
        }
    }
}

/// The global, process-wide OS allocator. A pass-through [`FreeHeap`] over
/// [`reserve_commit_pages`]/[`free_pages`] (§3.1 "OS" kind).
///
/// Every allocation is rounded up to a whole page, since the OS has no
/// concept of sub-page granularity; this makes `OsAllocator` a poor fit for
/// small, frequent allocations and a natural backing heap for large
/// long-lived arenas instead (see [`crate::memory::linear`]).
#[derive(Debug, Default, Clone, Copy)]
pub struct OsAllocator;

impl OsAllocator {
    pub const fn new() -> Self {
        Self
    }

    pub fn alloc(&self, size: usize) -> Result<*mut u8, AllocError> {
        let size = page_align(size);
        reserve_commit_pages(size).ok_or(AllocError::OutOfMemory)
    }

    /// # Safety
    ///
    /// `ptr` must have been returned by [`OsAllocator::alloc`] with the
    /// page-aligned size derived from `size`.
    pub unsafe fn dealloc(&self, ptr: *mut u8, size: usize) {
        unsafe {
            free_pages(ptr, page_align(size));
        }
    }

    pub fn as_free_heap(&self) -> FreeHeap<'static> {
        FreeHeap::new(&GLOBAL_OS_ALLOCATOR)
    }
}

impl AllocCapable for OsAllocator {
    fn heap_alloc(&self, size: usize, _align: usize) -> Result<NonNull<u8>, AllocError> {
        let ptr = self.alloc(size)?;
        NonNull::new(ptr).ok_or(AllocError::OutOfMemory)
    }
}

impl FreeCapable for OsAllocator {
    unsafe fn heap_dealloc(&self, ptr: NonNull<u8>, size: usize, _align: usize) {
        unsafe {
            self.dealloc(ptr.as_ptr(), size);
        }
    }
}

fn page_align(size: usize) -> usize {
    const PAGE_SIZE: usize = 4096;
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// The process-wide singleton, usable anywhere a [`FreeHeap`] is accepted
/// (§4.2).
pub static GLOBAL_OS_ALLOCATOR: OsAllocator = OsAllocator::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_and_free_roundtrip() {
        let size = 4096 * 4;
        let ptr = reserve_commit_pages(size).expect("OS allocation failed");
        unsafe {
            core::ptr::write_bytes(ptr, 0xAB, size);
            free_pages(ptr, size);
        }
    }

    #[test]
    fn page_align_rounds_up() {
        assert_eq!(page_align(1), 4096);
        assert_eq!(page_align(4096), 4096);
        assert_eq!(page_align(4097), 8192);
    }
}
