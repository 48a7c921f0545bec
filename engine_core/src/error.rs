//! Error types for every component, grouped the way the components are
//! grouped: one enum per subsystem rather than one crate-wide catch-all.

use thiserror::Error;

/// Failures from the allocator primitives (linear, stack, pool, TLSF, OS).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    #[error("allocator has insufficient remaining capacity for the request")]
    OutOfMemory,
    #[error("requested alignment is not a power of two")]
    InvalidAlignment,
    #[error("requested block size exceeds the allocator's fixed block size")]
    BlockTooLarge,
    #[error("pointer does not belong to this allocator")]
    ForeignPointer,
    #[error("stack allocator received a pop that does not match the last push")]
    UnbalancedPop,
    #[error("allocator already has its maximum number of live allocations")]
    TooManyLiveAllocations,
}

/// Failures raised by [`crate::fiber`] context switches.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FiberError {
    #[error("fiber stack is smaller than the minimum usable size")]
    StackTooSmall,
    #[error("fiber was resumed after it already returned")]
    AlreadyReturned,
}

/// Failures from the job system (kicking jobs, waiting on counters).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum JobSystemError {
    #[error("job queue is at capacity")]
    QueueFull,
    #[error("job system is shutting down and refuses new work")]
    ShuttingDown,
    #[error("no free job stack available in the stack pool")]
    StackPoolExhausted,
}

/// Failures from building and compiling a render graph.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("render graph contains a dependency cycle starting at pass {pass_index}")]
    Cycle { pass_index: usize },
    #[error("pass {pass_index} reads resource {resource:?} before any pass writes it")]
    ReadBeforeWrite { pass_index: usize, resource: crate::graph::resource::ResourceId },
    #[error("resource {resource:?} was never imported or created")]
    UnknownResource { resource: crate::graph::resource::ResourceId },
    #[error("physical resource placement failed: requested {requested} bytes, arena holds {capacity}")]
    PlacementOutOfMemory { requested: u64, capacity: u64 },
    #[error("back buffer must be written exactly once before compile, was written {writes} times")]
    BackBufferNotWritten { writes: u32 },
}

/// Failures surfaced by a [`crate::backend::GpuBackend`] implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend device was lost: {reason}")]
    DeviceLost { reason: String },
    #[error("backend resource creation failed: {reason}")]
    ResourceCreation { reason: String },
}
