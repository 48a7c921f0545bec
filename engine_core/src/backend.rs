//! The GPU backend boundary: every verb the executor needs from a device
//! API, with a deterministic [`NullBackend`] that records what it was
//! asked to do instead of touching real hardware. A real backend (D3D12,
//! Vulkan) implements the same trait; the executor never knows which one
//! it's driving.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::error::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FenceId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandListId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapLocation {
    GpuLocal,
    SysRamCpuToGpu,
    VramCpuToGpu,
    SysRamGpuToCpu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    Cbv,
    Srv,
    Uav,
    Rtv,
    Dsv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Graphics,
    Compute,
    RayTracing,
}

/// A resource state transition as the backend understands it: the same
/// shape as [`crate::graph::Barrier::Transition`], re-exposed here so
/// `record_barrier` doesn't need the graph module's barrier enum at the
/// backend boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedTransition {
    pub resource: ViewId,
    pub before: u32,
    pub after: u32,
}

/// The verbs an executor needs from a device API. A bindless,
/// descriptor-heap-indexed design: resources are addressed by the
/// integer indices [`ViewId`] wraps, not bound slots.
pub trait GpuBackend: Send + Sync {
    fn create_fence(&self) -> Result<FenceId, BackendError>;
    fn destroy_fence(&self, fence: FenceId);
    fn signal(&self, fence: FenceId, value: u64);
    fn wait(&self, fence: FenceId, value: u64);
    fn poll(&self, fence: FenceId, value: u64) -> bool;

    fn allocate_heap(&self, size: u64, location: HeapLocation) -> Result<HeapId, BackendError>;
    fn free_heap(&self, heap: HeapId);

    /// Places a buffer or texture at `(heap, offset, size)`. The compiler
    /// decides offsets; the backend only has to honor them.
    fn place_resource(&self, heap: HeapId, offset: u64, size: u64) -> Result<ViewId, BackendError>;

    fn create_view(&self, resource: ViewId, kind: ViewKind) -> Result<ViewId, BackendError>;
    fn create_pipeline(&self, kind: PipelineKind) -> Result<ViewId, BackendError>;

    fn allocate_command_list(&self) -> Result<CommandListId, BackendError>;
    fn free_command_list(&self, list: CommandListId);

    /// Submits a batch, signalling `fence` to `value` once the GPU retires
    /// the last command list in it.
    fn submit(&self, lists: &[CommandListId], fence: FenceId, value: u64);

    // -- Recording. Every call below appends a command to `list`; none take
    // effect until that list is submitted. --
    fn record_barrier(&self, list: CommandListId, transitions: &[RecordedTransition]);
    fn record_clear_rtv(&self, list: CommandListId, rtv: ViewId, color: [f32; 4]);
    fn record_clear_dsv(&self, list: CommandListId, dsv: ViewId, depth: f32, stencil: u8);
    fn record_set_pipeline(&self, list: CommandListId, pipeline: ViewId);
    fn record_set_index_buffer(&self, list: CommandListId, view: ViewId);
    fn record_set_vertex_buffer(&self, list: CommandListId, slot: u32, view: ViewId);
    fn record_set_viewport(&self, list: CommandListId, x: f32, y: f32, width: f32, height: f32);
    fn record_set_scissor(&self, list: CommandListId, x: i32, y: i32, width: u32, height: u32);
    fn record_set_render_targets(&self, list: CommandListId, rtvs: &[ViewId], dsv: Option<ViewId>);
    fn record_set_root_constants(&self, list: CommandListId, slot: u32, data: &[u32]);
    fn record_draw(&self, list: CommandListId, vertex_count: u32, instance_count: u32);
    fn record_dispatch(&self, list: CommandListId, x: u32, y: u32, z: u32);
    fn record_dispatch_rays(&self, list: CommandListId, x: u32, y: u32, z: u32);
}

/// A deterministic, CPU-only backend: every allocation succeeds and
/// returns a monotonically increasing id, fences are satisfied the
/// instant they're signalled. Exists for testing the executor's control
/// flow without a real device.
pub struct NullBackend {
    next_id: AtomicU64,
    fence_values: Mutex<std::collections::HashMap<u64, u64>>,
    /// Every recording call appends its name here, keyed by the command
    /// list it was recorded into; tests assert against this instead of a
    /// real GPU trace.
    recorded: Mutex<std::collections::HashMap<u64, Vec<&'static str>>>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self { next_id: AtomicU64::new(1), fence_values: Mutex::new(std::collections::HashMap::new()), recorded: Mutex::new(std::collections::HashMap::new()) }
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn record(&self, list: CommandListId, what: &'static str) {
        self.recorded.lock().unwrap().entry(list.0).or_default().push(what);
    }

    /// Returns every command name recorded into `list`, in order. Test-only
    /// introspection; a real backend has no equivalent since its command
    /// lists are opaque to the caller once recorded.
    pub fn recorded_commands(&self, list: CommandListId) -> Vec<&'static str> {
        self.recorded.lock().unwrap().get(&list.0).cloned().unwrap_or_default()
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for NullBackend {
    fn create_fence(&self) -> Result<FenceId, BackendError> {
        let id = self.next();
        self.fence_values.lock().unwrap().insert(id, 0);
        Ok(FenceId(id))
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.fence_values.lock().unwrap().remove(&fence.0);
    }

    fn signal(&self, fence: FenceId, value: u64) {
        if let Some(slot) = self.fence_values.lock().unwrap().get_mut(&fence.0) {
            *slot = value;
        }
    }

    fn wait(&self, _fence: FenceId, _value: u64) {
        // Signals are synchronous in this backend; there's never anything
        // to actually wait for.
    }

    fn poll(&self, fence: FenceId, value: u64) -> bool {
        self.fence_values.lock().unwrap().get(&fence.0).copied().unwrap_or(0) >= value
    }

    fn allocate_heap(&self, _size: u64, _location: HeapLocation) -> Result<HeapId, BackendError> {
        Ok(HeapId(self.next()))
    }

    fn free_heap(&self, _heap: HeapId) {}

    fn place_resource(&self, _heap: HeapId, _offset: u64, _size: u64) -> Result<ViewId, BackendError> {
        Ok(ViewId(self.next()))
    }

    fn create_view(&self, _resource: ViewId, _kind: ViewKind) -> Result<ViewId, BackendError> {
        Ok(ViewId(self.next()))
    }

    fn create_pipeline(&self, _kind: PipelineKind) -> Result<ViewId, BackendError> {
        Ok(ViewId(self.next()))
    }

    fn allocate_command_list(&self) -> Result<CommandListId, BackendError> {
        Ok(CommandListId(self.next()))
    }

    fn free_command_list(&self, _list: CommandListId) {}

    fn submit(&self, _lists: &[CommandListId], fence: FenceId, value: u64) {
        self.signal(fence, value);
    }

    fn record_barrier(&self, list: CommandListId, _transitions: &[RecordedTransition]) {
        self.record(list, "barrier");
    }

    fn record_clear_rtv(&self, list: CommandListId, _rtv: ViewId, _color: [f32; 4]) {
        self.record(list, "clear_rtv");
    }

    fn record_clear_dsv(&self, list: CommandListId, _dsv: ViewId, _depth: f32, _stencil: u8) {
        self.record(list, "clear_dsv");
    }

    fn record_set_pipeline(&self, list: CommandListId, _pipeline: ViewId) {
        self.record(list, "set_pipeline");
    }

    fn record_set_index_buffer(&self, list: CommandListId, _view: ViewId) {
        self.record(list, "set_index_buffer");
    }

    fn record_set_vertex_buffer(&self, list: CommandListId, _slot: u32, _view: ViewId) {
        self.record(list, "set_vertex_buffer");
    }

    fn record_set_viewport(&self, list: CommandListId, _x: f32, _y: f32, _width: f32, _height: f32) {
        self.record(list, "set_viewport");
    }

    fn record_set_scissor(&self, list: CommandListId, _x: i32, _y: i32, _width: u32, _height: u32) {
        self.record(list, "set_scissor");
    }

    fn record_set_render_targets(&self, list: CommandListId, _rtvs: &[ViewId], _dsv: Option<ViewId>) {
        self.record(list, "set_render_targets");
    }

    fn record_set_root_constants(&self, list: CommandListId, _slot: u32, _data: &[u32]) {
        self.record(list, "set_root_constants");
    }

    fn record_draw(&self, list: CommandListId, _vertex_count: u32, _instance_count: u32) {
        self.record(list, "draw");
    }

    fn record_dispatch(&self, list: CommandListId, _x: u32, _y: u32, _z: u32) {
        self.record(list, "dispatch");
    }

    fn record_dispatch_rays(&self, list: CommandListId, _x: u32, _y: u32, _z: u32) {
        self.record(list, "dispatch_rays");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_backend_signal_then_poll_observes_value() {
        let backend = NullBackend::new();
        let fence = backend.create_fence().unwrap();
        assert!(!backend.poll(fence, 1));
        backend.signal(fence, 1);
        assert!(backend.poll(fence, 1));
    }

    #[test]
    fn recording_calls_accumulate_on_their_command_list() {
        let backend = NullBackend::new();
        let list = backend.allocate_command_list().unwrap();
        backend.record_clear_rtv(list, ViewId(1), [0.0; 4]);
        backend.record_set_pipeline(list, ViewId(2));
        backend.record_draw(list, 3, 1);
        assert_eq!(backend.recorded_commands(list), vec!["clear_rtv", "set_pipeline", "draw"]);
    }

    #[test]
    fn submit_signals_the_batch_fence() {
        let backend = NullBackend::new();
        let fence = backend.create_fence().unwrap();
        let list = backend.allocate_command_list().unwrap();
        backend.submit(&[list], fence, 5);
        assert!(backend.poll(fence, 5));
    }
}
