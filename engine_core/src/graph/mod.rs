//! The render graph: a builder that records passes and their resource
//! accesses, a compiler that turns the recording into a scheduled,
//! physically-placed graph, and an executor that walks it frame by frame.

pub mod barrier;
pub mod builder;
pub mod compiler;
pub mod descriptor;
pub mod executor;
pub mod resource;

pub use barrier::Barrier;
pub use builder::RenderGraphBuilder;
pub use compiler::{compile, CompiledGraph};
pub use executor::{Executor, RenderContext};
pub use resource::{ResourceHandle, ResourceId, ResourceUsage};
