//! Resource barriers: the synchronization the compiler inserts between
//! passes so a GPU never reads a resource mid-write or writes one still
//! being read.

use super::resource::{ResourceId, ResourceUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// A state transition on a single resource: `before` must be visible
    /// to every access before `after` begins.
    Transition { resource: ResourceId, before: ResourceUsage, after: ResourceUsage },
    /// A read-after-write/write-after-write hazard on a resource left in
    /// `UNORDERED_ACCESS` the whole time; no state change, just a fence.
    Uav { resource: ResourceId },
    /// A physical resource was reused (aliased) by a new virtual one at
    /// the same placement; the previous occupant's writes must retire
    /// before the new occupant's first access.
    Aliasing { previous: ResourceId, next: ResourceId },
}

/// Barriers to run immediately before a pass, keyed by that pass's index
/// in compiled submission order.
#[derive(Debug, Clone, Default)]
pub struct PassBarriers {
    pub before: Vec<Barrier>,
}

/// Infers the single transition barrier needed to move a resource from
/// its last-committed usage into the usage a pass is about to make of it.
/// A resource not yet touched this frame is assumed to sit in `COMMON`
/// (the empty usage set), so its first access still gets a transition
/// out of it. Returns `None` only when the state genuinely doesn't change.
pub fn infer_transition(resource: ResourceId, before: ResourceUsage, after: ResourceUsage) -> Option<Barrier> {
    if before == after {
        None
    } else {
        Some(Barrier::Transition { resource, before, after })
    }
}
