//! Records a frame's passes and their resource accesses without running
//! anything. [`super::compiler`] turns the recording into a schedule.

use std::collections::HashMap;

use crate::error::CompileError;

use super::resource::{ResourceHandle, ResourceId, ResourceKind, ResourceUsage, ResourceVersion, TemporalLifetime, TextureFormat, TransientResourceDesc};

pub type PassId = u32;

/// Keyed by `ResourceId`, which is already a dense small integer; hashing it
/// with itself (no mixing) is both correct and faster than the default
/// hasher for the lookup-heavy paths `compile` runs over this map.
pub(super) type ResourceDescMap = HashMap<ResourceId, TransientResourceDesc, nohash_hasher::BuildNoHashHasher<ResourceId>>;

/// Opaque target for a pass handler — the raw arguments a builder gave it,
/// replayed in order during execution. Not generic over a user payload
/// type since passes are stored type-erased in one `Vec`.
pub type PassHandlerFn = fn(ctx: &super::executor::RenderContext, data: *const u8);

pub struct AccessRecord {
    pub pass: PassId,
    pub resource: ResourceId,
    /// The version this access leaves the resource at: unchanged by reads,
    /// bumped by one for writes.
    pub version: ResourceVersion,
    /// The version this access *observes* — equal to `version` for reads,
    /// `version - 1` for writes. Matching one pass's write `version`
    /// against another's `observed_version` on the same resource is what
    /// wires up the dependency edge between them.
    pub observed_version: ResourceVersion,
    pub access: ResourceUsage,
    pub is_write: bool,
    pub temporal_frame_offset: i32,
}

pub struct PassRecord {
    pub id: PassId,
    pub name: String,
    pub handler: PassHandlerFn,
    pub data: *const u8,
    pub accesses: Vec<AccessRecord>,
}

// SAFETY: `data` is only dereferenced by `handler` while the executor walks
// the compiled graph on a single thread at a time; the builder never
// touches it after recording.
unsafe impl Send for PassRecord {}
unsafe impl Sync for PassRecord {}

/// A read-descriptor handle returned by `rg_read_*`: enough information
/// for the executor to resolve the physical resource and bind it.
#[derive(Debug, Clone, Copy)]
pub struct ReadDescriptor {
    pub pass: PassId,
    pub resource: ResourceId,
    pub temporal_lifetime: u32,
    pub temporal_frame_offset: i32,
}

/// A write-descriptor handle returned by `rg_write_*`.
#[derive(Debug, Clone, Copy)]
pub struct WriteDescriptor {
    pub pass: PassId,
    pub resource: ResourceId,
}

pub const BACK_BUFFER_ID: ResourceId = ResourceId(0);

pub struct RenderGraphBuilder {
    pub(super) resource_descs: ResourceDescMap,
    pub(super) passes: Vec<PassRecord>,
    next_resource_id: u32,
    next_pass_id: u32,
    back_buffer_used: bool,
}

impl RenderGraphBuilder {
    pub fn new() -> Self {
        Self { resource_descs: ResourceDescMap::default(), passes: Vec::new(), next_resource_id: 1, next_pass_id: 0, back_buffer_used: false }
    }

    fn alloc_resource_id(&mut self) -> ResourceId {
        let id = ResourceId(self.next_resource_id);
        self.next_resource_id += 1;
        id
    }

    pub fn create_texture(&mut self, _name: &str, width: u32, height: u32, format: TextureFormat, temporal_lifetime: u32) -> ResourceHandle {
        self.create_texture_array(_name, width, height, format, 1, temporal_lifetime)
    }

    pub fn create_texture_array(&mut self, _name: &str, width: u32, height: u32, format: TextureFormat, array_size: u32, temporal_lifetime: u32) -> ResourceHandle {
        let id = self.alloc_resource_id();
        let lifetime = lifetime_from_count(temporal_lifetime);
        self.resource_descs.insert(
            id,
            TransientResourceDesc { kind: ResourceKind::Texture2D, width, height, depth_or_array_layers: array_size, format, lifetime, is_upload: false },
        );
        ResourceHandle { id, version: ResourceVersion(0), temporal_lifetime }
    }

    pub fn create_buffer(&mut self, _name: &str, size: u32, _stride: u32, temporal_lifetime: u32) -> ResourceHandle {
        let id = self.alloc_resource_id();
        let lifetime = lifetime_from_count(temporal_lifetime);
        self.resource_descs.insert(
            id,
            TransientResourceDesc { kind: ResourceKind::Buffer, width: size, height: 1, depth_or_array_layers: 1, format: TextureFormat::R32Float, lifetime, is_upload: false },
        );
        ResourceHandle { id, version: ResourceVersion(0), temporal_lifetime }
    }

    /// `_heap_kind` distinguishes CPU-visible placement strategies a real
    /// backend cares about (write-combined vs. cached); the graph itself
    /// only needs to know this resource rotates through the per-frame
    /// upload arenas rather than the single-shot local arena.
    pub fn create_upload_buffer(&mut self, _name: &str, _heap_kind: UploadHeapKind, size: u32, _stride: u32) -> ResourceHandle {
        let id = self.alloc_resource_id();
        self.resource_descs.insert(
            id,
            TransientResourceDesc {
                kind: ResourceKind::Buffer,
                width: size,
                height: 1,
                depth_or_array_layers: 1,
                format: TextureFormat::R32Float,
                lifetime: TemporalLifetime::Transient,
                is_upload: true,
            },
        );
        ResourceHandle { id, version: ResourceVersion(0), temporal_lifetime: 0 }
    }

    /// Returns the reserved handle for the swap chain back buffer (id 0).
    /// Only the first write bumps it to version 1, which [`compile`]
    /// requires before accepting the graph.
    pub fn import_back_buffer(&mut self) -> ResourceHandle {
        self.back_buffer_used = true;
        ResourceHandle { id: BACK_BUFFER_ID, version: ResourceVersion(0), temporal_lifetime: 0 }
    }

    pub fn add_render_pass(&mut self, name: &str, handler: PassHandlerFn, data: *const u8) -> PassId {
        let id = self.next_pass_id;
        self.next_pass_id += 1;
        self.passes.push(PassRecord { id, name: name.to_string(), handler, data, accesses: Vec::new() });
        id
    }

    fn pass_mut(&mut self, pass: PassId) -> &mut PassRecord {
        self.passes.iter_mut().find(|p| p.id == pass).expect("pass id came from add_render_pass on this builder")
    }

    fn assert_not_yet_touched(&self, pass: PassId, resource: ResourceId) {
        let touched = self.passes.iter().find(|p| p.id == pass).map(|p| p.accesses.iter().any(|a| a.resource == resource)).unwrap_or(false);
        assert!(!touched, "pass {pass} already reads or writes resource {resource:?}");
    }

    pub fn rg_read_texture(&mut self, pass: PassId, handle: ResourceHandle, access: ResourceUsage, temporal_frame_offset: i32) -> ReadDescriptor {
        self.rg_read(pass, handle, access, temporal_frame_offset)
    }

    pub fn rg_read_buffer(&mut self, pass: PassId, handle: ResourceHandle, access: ResourceUsage, temporal_frame_offset: i32) -> ReadDescriptor {
        self.rg_read(pass, handle, access, temporal_frame_offset)
    }

    fn rg_read(&mut self, pass: PassId, handle: ResourceHandle, access: ResourceUsage, temporal_frame_offset: i32) -> ReadDescriptor {
        assert!(
            handle.temporal_lifetime > 0 || temporal_frame_offset == 0,
            "resource {:?} has temporal_lifetime 0 and cannot be read with a non-zero temporal offset",
            handle.id
        );
        self.assert_not_yet_touched(pass, handle.id);
        self.pass_mut(pass).accesses.push(AccessRecord {
            pass,
            resource: handle.id,
            version: handle.version,
            observed_version: handle.version,
            access,
            is_write: false,
            temporal_frame_offset,
        });
        ReadDescriptor { pass, resource: handle.id, temporal_lifetime: handle.temporal_lifetime, temporal_frame_offset }
    }

    fn rg_write(&mut self, pass: PassId, handle: &mut ResourceHandle, access: ResourceUsage) -> WriteDescriptor {
        self.assert_not_yet_touched(pass, handle.id);
        let observed_version = handle.version;
        handle.version = ResourceVersion(handle.version.0 + 1);
        self.pass_mut(pass).accesses.push(AccessRecord {
            pass,
            resource: handle.id,
            version: handle.version,
            observed_version,
            access,
            is_write: true,
            temporal_frame_offset: 0,
        });
        WriteDescriptor { pass, resource: handle.id }
    }

    pub fn rg_write_texture(&mut self, pass: PassId, handle: &mut ResourceHandle, access: ResourceUsage) -> WriteDescriptor {
        self.rg_write(pass, handle, access)
    }

    pub fn rg_write_buffer(&mut self, pass: PassId, handle: &mut ResourceHandle, access: ResourceUsage) -> WriteDescriptor {
        self.rg_write(pass, handle, access)
    }

    pub fn rg_write_rtv(&mut self, pass: PassId, handle: &mut ResourceHandle) -> WriteDescriptor {
        self.rg_write(pass, handle, ResourceUsage::RENDER_TARGET)
    }

    pub fn rg_write_dsv(&mut self, pass: PassId, handle: &mut ResourceHandle) -> WriteDescriptor {
        self.rg_write(pass, handle, ResourceUsage::DEPTH_STENCIL)
    }

    /// Validates the back buffer's final version before handing the
    /// recording to [`super::compiler::compile`].
    pub(super) fn validate(&self) -> Result<(), CompileError> {
        if self.back_buffer_used {
            let version = self.resource_version_of(BACK_BUFFER_ID);
            if version != 1 {
                return Err(CompileError::BackBufferNotWritten { writes: version });
            }
        }
        Ok(())
    }

    fn resource_version_of(&self, id: ResourceId) -> u32 {
        self.passes.iter().flat_map(|p| p.accesses.iter()).filter(|a| a.resource == id && a.is_write).map(|a| a.version.0).max().unwrap_or(0)
    }
}

impl Default for RenderGraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadHeapKind {
    Cpu,
    CpuToGpu,
}

fn lifetime_from_count(temporal_lifetime: u32) -> TemporalLifetime {
    if temporal_lifetime == 0 {
        TemporalLifetime::Transient
    } else {
        TemporalLifetime::Temporal { history_depth: temporal_lifetime }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_handler(_ctx: &super::super::executor::RenderContext, _data: *const u8) {}

    #[test]
    fn write_bumps_version_and_read_does_not() {
        let mut builder = RenderGraphBuilder::new();
        let mut tex = builder.create_texture("color", 1920, 1080, TextureFormat::Rgba8Unorm, 0);
        let pass_a = builder.add_render_pass("a", noop_handler, core::ptr::null());
        builder.rg_write_rtv(pass_a, &mut tex);
        assert_eq!(tex.version.0, 1);

        let pass_b = builder.add_render_pass("b", noop_handler, core::ptr::null());
        builder.rg_read_texture(pass_b, tex, ResourceUsage::SHADER_RESOURCE, 0);
        assert_eq!(tex.version.0, 1);
    }

    #[test]
    #[should_panic(expected = "already reads or writes")]
    fn pass_cannot_read_and_write_same_resource() {
        let mut builder = RenderGraphBuilder::new();
        let mut tex = builder.create_texture("color", 64, 64, TextureFormat::Rgba8Unorm, 0);
        let pass = builder.add_render_pass("p", noop_handler, core::ptr::null());
        builder.rg_write_rtv(pass, &mut tex);
        builder.rg_read_texture(pass, tex, ResourceUsage::SHADER_RESOURCE, 0);
    }

    #[test]
    #[should_panic(expected = "temporal_lifetime 0")]
    fn zero_temporal_lifetime_rejects_nonzero_offset() {
        let mut builder = RenderGraphBuilder::new();
        let tex = builder.create_texture("color", 64, 64, TextureFormat::Rgba8Unorm, 0);
        let pass = builder.add_render_pass("p", noop_handler, core::ptr::null());
        builder.rg_read_texture(pass, tex, ResourceUsage::SHADER_RESOURCE, 1);
    }
}
