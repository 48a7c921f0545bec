//! Small container building blocks layered over [`crate::memory`]. Plain
//! `Vec`/`HashMap`/`Option`/`Result` cover most of the system; this module
//! only holds what they don't: a fixed-capacity ring queue, and allocator
//! aliases for code that wants its collections to live in a specific heap
//! rather than the process-global one.

mod cap_alloc;
mod ring_queue;

pub use cap_alloc::{CapHashMap, CapVec};
pub use ring_queue::{Full as RingQueueFull, RingQueue};
