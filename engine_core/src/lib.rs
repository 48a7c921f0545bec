//! Memory, fiber job system, and render graph core of a real-time 3D
//! rendering engine.
//!
//! Three subsystems, each usable on its own:
//!
//! - [`memory`]: linear, stack, pool, and TLSF allocators behind capability
//!   handles ([`memory::AllocHeap`], [`memory::FreeHeap`],
//!   [`memory::ReallocFreeHeap`]), plus the thread-local scratch context.
//! - [`fiber`] and [`job`]: cooperative fibers multiplexed over a fixed
//!   pool of OS worker threads, driven by priority job queues and
//!   `yield_to_counter` fork-join synchronization.
//! - [`graph`]: a render-graph builder, compiler, and executor that
//!   schedule GPU passes against an opaque [`backend::GpuBackend`].

pub mod backend;
pub mod config;
pub mod containers;
pub mod error;
pub mod fiber;
pub mod graph;
pub mod job;
pub mod memory;
pub mod threading;
