//! Allocator primitives and the heap capability handles that erase them.
//!
//! Four concrete allocator kinds ([`linear`], [`stack`], [`pool`], [`tlsf`])
//! sit over a single ultimate source of memory ([`os`]). None of them know
//! about each other; code that needs an allocator takes a
//! [`heap::AllocHeap`], [`heap::FreeHeap`], or [`heap::ReallocFreeHeap`]
//! instead of a concrete type, so a render-graph arena and a job-system pool
//! can share call sites without generic parameters leaking everywhere.

pub mod context;
pub mod heap;
pub mod linear;
pub mod os;
pub mod pool;
pub mod stack;
pub mod tlsf;

mod util;

pub use context::{ScratchAllocator, DEFAULT_SCRATCH_CAPACITY};
pub use heap::{AllocCapable, AllocHeap, FreeCapable, FreeHeap, ReallocCapable, ReallocFreeHeap};
pub use linear::LinearAllocator;
pub use os::OsAllocator;
pub use pool::{PoolAllocator, TypedPool};
pub use stack::StackAllocator;
pub use tlsf::TlsfAllocator;
