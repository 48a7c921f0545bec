//! Turns a recorded [`RenderGraphBuilder`] into a schedule: dependency
//! levels, physical resource placement, and the barriers each level needs.

use std::collections::HashMap;

use engine_tracing::trace_span;

use crate::error::CompileError;
use crate::memory::{FreeHeap, LinearAllocator};

use super::barrier::{infer_transition, Barrier, PassBarriers};
use super::builder::{PassId, PassRecord, RenderGraphBuilder, BACK_BUFFER_ID};
use super::descriptor::{descriptor_types_for_usage, DescriptorIndex, DescriptorTable};
use super::resource::{ResourceId, ResourceUsage, TemporalLifetime};

/// `ResourceId` keys are dense small integers with an identity `Hash`; the
/// default hasher's mixing buys nothing here and costs real time across the
/// lookup-heavy placement and barrier-inference passes below.
type ResourceMap<V> = HashMap<ResourceId, V, nohash_hasher::BuildNoHashHasher<ResourceId>>;

/// Which conceptual arena a resource's physical backing lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArenaKind {
    Local,
    Upload { frame_slot: u32 },
    Temporal { slot: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub arena: ArenaKind,
    pub offset: u64,
    pub size: u64,
}

pub struct CompiledPass {
    pub id: PassId,
    pub name: String,
    pub handler: super::builder::PassHandlerFn,
    pub data: *const u8,
}

unsafe impl Send for CompiledPass {}
unsafe impl Sync for CompiledPass {}

pub struct DependencyLevel {
    pub passes: Vec<CompiledPass>,
    pub barriers: PassBarriers,
}

pub struct CompiledGraph<'a> {
    pub levels: Vec<DependencyLevel>,
    pub exit_barriers: Vec<Barrier>,
    pub placements: ResourceMap<Placement>,
    /// Per-(resource, frame-slot) placement for upload resources, one entry
    /// per slot in `0..upload_arenas.len()` since each rotation gets its own
    /// physical backing.
    pub upload_placements: HashMap<(ResourceId, u32), Placement>,
    pub resource_usage: ResourceMap<ResourceUsage>,
    pub descriptors: DescriptorTable,
    pub descriptor_indices: HashMap<(ResourceId, super::descriptor::DescriptorType, u32), DescriptorIndex>,
    pub local_arena: LinearAllocator<'a>,
    pub upload_arenas: Vec<LinearAllocator<'a>>,
    pub temporal_arenas: Vec<LinearAllocator<'a>>,
}

/// Compiles `builder` into an executable graph, allocating its physical
/// arenas from `heap`. `frames_in_flight` controls how many upload arenas
/// are cycled through.
pub fn compile<'a>(heap: FreeHeap<'a>, builder: &RenderGraphBuilder, frames_in_flight: u32) -> Result<CompiledGraph<'a>, CompileError> {
    let _span = trace_span!("graph.compile");
    builder.validate()?;

    let adjacency = build_adjacency(builder);
    check_for_cycles(builder, &adjacency)?;
    let topo_order = topological_order(builder, &adjacency);
    let levels_by_pass = assign_dependency_levels(builder, &adjacency, &topo_order);

    let resource_usage = infer_resource_usage(builder);
    let (descriptors, descriptor_indices) = infer_descriptors(builder, &resource_usage);

    let level_count = levels_by_pass.values().copied().max().map(|m| m + 1).unwrap_or(0);
    let mut level_passes: Vec<Vec<PassId>> = vec![Vec::new(); level_count];
    for pass in &builder.passes {
        let level = levels_by_pass[&pass.id];
        level_passes[level].push(pass.id);
    }

    let (placements, upload_placements, local_arena, upload_arenas, temporal_arenas) = place_resources(heap, builder, frames_in_flight)?;

    let (levels, exit_barriers) = infer_barriers(builder, &level_passes, &resource_usage);

    Ok(CompiledGraph {
        levels,
        exit_barriers,
        placements,
        upload_placements,
        resource_usage,
        descriptors,
        descriptor_indices,
        local_arena,
        upload_arenas,
        temporal_arenas,
    })
}

/// Edge `P -> Q`: built by matching each pass's write (`version`) against
/// every other pass's access that observes that same `(id, version)`.
fn build_adjacency(builder: &RenderGraphBuilder) -> HashMap<PassId, Vec<PassId>> {
    let mut adjacency: HashMap<PassId, Vec<PassId>> = builder.passes.iter().map(|p| (p.id, Vec::new())).collect();

    for producer in &builder.passes {
        for write in producer.accesses.iter().filter(|a| a.is_write) {
            for consumer in &builder.passes {
                if consumer.id == producer.id {
                    continue;
                }
                let depends = consumer.accesses.iter().any(|a| a.resource == write.resource && a.observed_version == write.version);
                if depends {
                    adjacency.get_mut(&producer.id).unwrap().push(consumer.id);
                }
            }
        }
    }
    adjacency
}

fn check_for_cycles(builder: &RenderGraphBuilder, adjacency: &HashMap<PassId, Vec<PassId>>) -> Result<(), CompileError> {
    let mut visited: HashMap<PassId, VisitState> = builder.passes.iter().map(|p| (p.id, VisitState::Unvisited)).collect();

    for pass in &builder.passes {
        if visited[&pass.id] == VisitState::Unvisited {
            dfs_cycle_check(pass.id, adjacency, &mut visited)?;
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

fn dfs_cycle_check(pass: PassId, adjacency: &HashMap<PassId, Vec<PassId>>, visited: &mut HashMap<PassId, VisitState>) -> Result<(), CompileError> {
    visited.insert(pass, VisitState::InProgress);
    for &next in &adjacency[&pass] {
        match visited[&next] {
            VisitState::InProgress => return Err(CompileError::Cycle { pass_index: pass as usize }),
            VisitState::Unvisited => dfs_cycle_check(next, adjacency, visited)?,
            VisitState::Done => {}
        }
    }
    visited.insert(pass, VisitState::Done);
    Ok(())
}

/// DFS post-order, reversed, so that every pass appears after everything
/// it depends on.
fn topological_order(builder: &RenderGraphBuilder, adjacency: &HashMap<PassId, Vec<PassId>>) -> Vec<PassId> {
    let mut visited: HashMap<PassId, bool> = builder.passes.iter().map(|p| (p.id, false)).collect();
    let mut post_order = Vec::with_capacity(builder.passes.len());

    for pass in &builder.passes {
        if !visited[&pass.id] {
            dfs_post_order(pass.id, adjacency, &mut visited, &mut post_order);
        }
    }
    post_order.reverse();
    post_order
}

fn dfs_post_order(pass: PassId, adjacency: &HashMap<PassId, Vec<PassId>>, visited: &mut HashMap<PassId, bool>, post_order: &mut Vec<PassId>) {
    visited.insert(pass, true);
    for &next in &adjacency[&pass] {
        if !visited[&next] {
            dfs_post_order(next, adjacency, visited, post_order);
        }
    }
    post_order.push(pass);
}

/// Each pass's level is its longest-path distance from any root (a pass
/// with no incoming edges). Passes in the same level carry no ordering
/// constraint between each other and may run in parallel.
fn assign_dependency_levels(builder: &RenderGraphBuilder, adjacency: &HashMap<PassId, Vec<PassId>>, topo_order: &[PassId]) -> HashMap<PassId, usize> {
    let mut level: HashMap<PassId, usize> = builder.passes.iter().map(|p| (p.id, 0)).collect();

    for &pass in topo_order {
        for &next in &adjacency[&pass] {
            let candidate = level[&pass] + 1;
            if candidate > level[&next] {
                level.insert(next, candidate);
            }
        }
    }
    level
}

fn infer_resource_usage(builder: &RenderGraphBuilder) -> ResourceMap<ResourceUsage> {
    let mut usage: ResourceMap<ResourceUsage> = ResourceMap::default();
    for pass in &builder.passes {
        for access in &pass.accesses {
            *usage.entry(access.resource).or_insert(ResourceUsage::empty()) |= access.access;
        }
    }
    usage
}

/// Allocates one descriptor per `(resource, kind, frame slot)`. A resource
/// with `history_depth > 0` gets a distinct descriptor for every historical
/// copy, since each slot is a physically separate resource the backend
/// must bind separately; non-temporal resources only ever use slot 0.
fn infer_descriptors(
    builder: &RenderGraphBuilder,
    resource_usage: &ResourceMap<ResourceUsage>,
) -> (DescriptorTable, HashMap<(ResourceId, super::descriptor::DescriptorType, u32), DescriptorIndex>) {
    let mut table = DescriptorTable::new();
    let mut indices = HashMap::new();
    let mut resources: Vec<_> = resource_usage.keys().copied().collect();
    resources.sort_by_key(|r| r.0);
    for resource in resources {
        let frame_slots = match builder.resource_descs.get(&resource).map(|d| d.lifetime) {
            Some(TemporalLifetime::Temporal { history_depth }) => history_depth + 1,
            _ => 1,
        };
        for kind in descriptor_types_for_usage(resource_usage[&resource]) {
            for slot in 0..frame_slots {
                let index = table.allocate(kind);
                indices.insert((resource, kind, slot), index);
            }
        }
    }
    (table, indices)
}

type Arenas<'a> = (ResourceMap<Placement>, HashMap<(ResourceId, u32), Placement>, LinearAllocator<'a>, Vec<LinearAllocator<'a>>, Vec<LinearAllocator<'a>>);

/// Buckets each virtual resource into the local arena, an upload arena
/// per in-flight frame, or one temporal arena per history slot, then
/// bump-allocates its physical placement from the matching arena.
fn place_resources<'a>(heap: FreeHeap<'a>, builder: &RenderGraphBuilder, frames_in_flight: u32) -> Result<Arenas<'a>, CompileError> {
    let mut local_size = 0u64;
    let mut upload_size = 0u64;
    let mut max_temporal_lifetime = 0u32;
    for (id, desc) in &builder.resource_descs {
        if *id == BACK_BUFFER_ID {
            continue;
        }
        if desc.is_upload {
            upload_size += desc.approx_byte_size();
            continue;
        }
        match desc.lifetime {
            TemporalLifetime::Transient => local_size += desc.approx_byte_size(),
            TemporalLifetime::Temporal { history_depth } => max_temporal_lifetime = max_temporal_lifetime.max(history_depth + 1),
            TemporalLifetime::Imported => {}
        }
    }

    let local_size = local_size.max(1);
    let mut local_arena = LinearAllocator::new(heap, local_size as usize).map_err(|_| CompileError::PlacementOutOfMemory { requested: local_size, capacity: local_size })?;

    let upload_size = upload_size.max(1);
    let mut upload_arenas = Vec::new();
    for _ in 0..frames_in_flight {
        upload_arenas.push(LinearAllocator::new(heap, upload_size as usize).map_err(|_| CompileError::PlacementOutOfMemory { requested: upload_size, capacity: upload_size })?);
    }

    let temporal_size = builder
        .resource_descs
        .values()
        .filter_map(|d| match d.lifetime {
            TemporalLifetime::Temporal { .. } => Some(d.approx_byte_size()),
            _ => None,
        })
        .sum::<u64>()
        .max(1);
    let mut temporal_arenas = Vec::new();
    for _ in 0..max_temporal_lifetime {
        temporal_arenas.push(LinearAllocator::new(heap, temporal_size as usize).map_err(|_| CompileError::PlacementOutOfMemory { requested: temporal_size, capacity: temporal_size })?);
    }

    let mut placements = ResourceMap::default();
    let mut upload_placements = HashMap::new();
    for (id, desc) in &builder.resource_descs {
        if *id == BACK_BUFFER_ID {
            continue;
        }
        let size = desc.approx_byte_size().max(1);

        if desc.is_upload {
            for (slot, arena) in upload_arenas.iter_mut().enumerate() {
                let ptr = arena.alloc_raw(size as usize, 256).map_err(|_| CompileError::PlacementOutOfMemory { requested: size, capacity: upload_size })?;
                let offset = ptr.as_ptr() as u64 - arena.base_ptr().as_ptr() as u64;
                upload_placements.insert((*id, slot as u32), Placement { arena: ArenaKind::Upload { frame_slot: slot as u32 }, offset, size });
            }
            continue;
        }

        match desc.lifetime {
            TemporalLifetime::Transient => {
                let ptr = local_arena.alloc_raw(size as usize, 256).map_err(|_| CompileError::PlacementOutOfMemory { requested: size, capacity: local_size })?;
                let offset = ptr.as_ptr() as u64 - local_arena.base_ptr().as_ptr() as u64;
                placements.insert(*id, Placement { arena: ArenaKind::Local, offset, size });
            }
            TemporalLifetime::Temporal { history_depth } => {
                for slot in 0..=history_depth {
                    let arena = &mut temporal_arenas[slot as usize];
                    let ptr = arena.alloc_raw(size as usize, 256).map_err(|_| CompileError::PlacementOutOfMemory { requested: size, capacity: temporal_size })?;
                    let offset = ptr.as_ptr() as u64 - arena.base_ptr().as_ptr() as u64;
                    placements.entry(*id).or_insert(Placement { arena: ArenaKind::Temporal { slot }, offset, size });
                }
            }
            TemporalLifetime::Imported => {}
        }
    }

    Ok((placements, upload_placements, local_arena, upload_arenas, temporal_arenas))
}

/// Simulates execution level by level, tracking each resource's last
/// committed GPU state, emitting a `Transition` when a level's
/// accumulated access differs from it and a `Uav` barrier whenever the
/// new state lands on `UNORDERED_ACCESS` (to serialise successive UAV
/// accesses that a plain state match would otherwise let race).
fn infer_barriers(builder: &RenderGraphBuilder, level_passes: &[Vec<PassId>], resource_usage: &ResourceMap<ResourceUsage>) -> (Vec<DependencyLevel>, Vec<Barrier>) {
    let pass_by_id: HashMap<PassId, &PassRecord> = builder.passes.iter().map(|p| (p.id, p)).collect();
    let mut last_state: ResourceMap<ResourceUsage> = ResourceMap::default();
    let mut levels = Vec::with_capacity(level_passes.len());

    for pass_ids in level_passes {
        let mut level_access: ResourceMap<ResourceUsage> = ResourceMap::default();
        for &pid in pass_ids {
            for access in &pass_by_id[&pid].accesses {
                *level_access.entry(access.resource).or_insert(ResourceUsage::empty()) |= access.access;
            }
        }

        let mut barriers = Vec::new();
        let mut sorted_resources: Vec<_> = level_access.keys().copied().collect();
        sorted_resources.sort_by_key(|r| r.0);
        for resource in sorted_resources {
            let next_state = level_access[&resource];
            let prior = last_state.get(&resource).copied().unwrap_or(ResourceUsage::empty());
            if let Some(barrier) = infer_transition(resource, prior, next_state) {
                barriers.push(barrier);
            } else if next_state.contains(ResourceUsage::UNORDERED_ACCESS) {
                // Same state held across levels, but it's UAV: two passes
                // reading and writing the same UAV without a state change
                // still need a fence so they don't race.
                barriers.push(Barrier::Uav { resource });
            }
            last_state.insert(resource, next_state);
        }

        let passes = pass_ids
            .iter()
            .map(|&id| {
                let record = pass_by_id[&id];
                CompiledPass { id, name: record.name.clone(), handler: record.handler, data: record.data }
            })
            .collect();
        levels.push(DependencyLevel { passes, barriers: PassBarriers { before: barriers } });
    }

    // Every resource returns to COMMON after the frame, except the back
    // buffer, which must land in PRESENT for the backend's swap chain
    // `Present` call.
    let mut exit_barriers = Vec::new();
    let mut resources: Vec<_> = resource_usage.keys().copied().collect();
    resources.sort_by_key(|r| r.0);
    for resource in resources {
        let before = last_state.get(&resource).copied().unwrap_or(ResourceUsage::empty());
        let after = if resource == BACK_BUFFER_ID { ResourceUsage::PRESENT } else { ResourceUsage::empty() };
        if let Some(barrier) = infer_transition(resource, before, after) {
            exit_barriers.push(barrier);
        }
    }
    (levels, exit_barriers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::resource::TextureFormat;

    fn noop_handler(_ctx: &crate::graph::executor::RenderContext, _data: *const u8) {}

    /// Builds nine passes with the edges P8->P3, P6->P3, P3->{P2,P0},
    /// P7->P4, P5->P4, P4->P1, P1->P0, P2->P0, each wired through its own
    /// resource (a pass can't both read and write one id, so each edge
    /// needs a distinct producer resource).
    #[test]
    fn nine_pass_topology_matches_expected_levels() {
        let mut builder = RenderGraphBuilder::new();
        let passes: Vec<_> = (0..9).map(|i| builder.add_render_pass(&format!("p{i}"), noop_handler, core::ptr::null())).collect();
        let edges = [(8, 3), (6, 3), (3, 2), (3, 0), (7, 4), (5, 4), (4, 1), (1, 0), (2, 0)];
        for (producer, consumer) in edges {
            let mut h = builder.create_texture("r", 4, 4, TextureFormat::Rgba8Unorm, 0);
            builder.rg_write_texture(passes[producer], &mut h, ResourceUsage::RENDER_TARGET);
            builder.rg_read_texture(passes[consumer], h, ResourceUsage::SHADER_RESOURCE, 0);
        }

        let adjacency = build_adjacency(&builder);
        check_for_cycles(&builder, &adjacency).unwrap();
        let topo = topological_order(&builder, &adjacency);
        let levels = assign_dependency_levels(&builder, &adjacency, &topo);

        assert_eq!(levels[&passes[8]], 0);
        assert_eq!(levels[&passes[7]], 0);
        assert_eq!(levels[&passes[6]], 0);
        assert_eq!(levels[&passes[5]], 0);
        assert_eq!(levels[&passes[4]], 1);
        assert_eq!(levels[&passes[3]], 1);
        assert_eq!(levels[&passes[1]], 2);
        assert_eq!(levels[&passes[2]], 2);
        assert_eq!(levels[&passes[0]], 3);
    }

    #[test]
    fn cyclic_graph_is_rejected() {
        let mut builder = RenderGraphBuilder::new();
        let pass_a = builder.add_render_pass("a", noop_handler, core::ptr::null());
        let pass_b = builder.add_render_pass("b", noop_handler, core::ptr::null());
        let mut r1 = builder.create_texture("r1", 4, 4, TextureFormat::Rgba8Unorm, 0);
        let mut r2 = builder.create_texture("r2", 4, 4, TextureFormat::Rgba8Unorm, 0);
        builder.rg_write_texture(pass_a, &mut r1, ResourceUsage::RENDER_TARGET);
        builder.rg_read_texture(pass_b, r1, ResourceUsage::SHADER_RESOURCE, 0);
        builder.rg_write_texture(pass_b, &mut r2, ResourceUsage::RENDER_TARGET);
        builder.rg_read_texture(pass_a, r2, ResourceUsage::SHADER_RESOURCE, 0);

        let adjacency = build_adjacency(&builder);
        assert!(matches!(check_for_cycles(&builder, &adjacency), Err(CompileError::Cycle { .. })));
    }

    /// Pass A writes texture T as a color target, pass B reads it as an
    /// SRV: level 0 should carry a COMMON -> RENDER_TARGET barrier on T,
    /// level 1 a RENDER_TARGET -> PIXEL_SHADER_RESOURCE barrier, and the
    /// frame's exit barriers should restore it to COMMON.
    #[test]
    fn two_pass_barrier_scenario_matches_expected_transitions() {
        let mut builder = RenderGraphBuilder::new();
        let mut tex = builder.create_texture("t", 64, 64, TextureFormat::Rgba8Unorm, 0);
        let pass_a = builder.add_render_pass("a", noop_handler, core::ptr::null());
        let pass_b = builder.add_render_pass("b", noop_handler, core::ptr::null());
        builder.rg_write_rtv(pass_a, &mut tex);
        builder.rg_read_texture(pass_b, tex, ResourceUsage::SHADER_RESOURCE, 0);

        let adjacency = build_adjacency(&builder);
        let topo = topological_order(&builder, &adjacency);
        let levels_by_pass = assign_dependency_levels(&builder, &adjacency, &topo);
        assert_eq!(levels_by_pass[&pass_a], 0);
        assert_eq!(levels_by_pass[&pass_b], 1);

        let level_count = levels_by_pass.values().copied().max().unwrap() + 1;
        let mut level_passes = vec![Vec::new(); level_count];
        for pass in &builder.passes {
            level_passes[levels_by_pass[&pass.id]].push(pass.id);
        }
        let resource_usage = infer_resource_usage(&builder);
        let (levels, exit_barriers) = infer_barriers(&builder, &level_passes, &resource_usage);

        assert_eq!(
            levels[0].barriers.before,
            vec![Barrier::Transition { resource: tex.id, before: ResourceUsage::empty(), after: ResourceUsage::RENDER_TARGET }]
        );
        assert_eq!(
            levels[1].barriers.before,
            vec![Barrier::Transition { resource: tex.id, before: ResourceUsage::RENDER_TARGET, after: ResourceUsage::SHADER_RESOURCE }]
        );
        assert_eq!(
            exit_barriers,
            vec![Barrier::Transition { resource: tex.id, before: ResourceUsage::SHADER_RESOURCE, after: ResourceUsage::empty() }]
        );
    }

    #[test]
    fn back_buffer_only_graph_exits_to_present() {
        let mut builder = RenderGraphBuilder::new();
        let mut back_buffer = builder.import_back_buffer();
        let pass = builder.add_render_pass("present", noop_handler, core::ptr::null());
        builder.rg_write_rtv(pass, &mut back_buffer);

        let heap = crate::memory::os::GLOBAL_OS_ALLOCATOR.as_free_heap();
        let compiled = compile(heap, &builder, 2).expect("compile should succeed");

        assert_eq!(compiled.levels.len(), 1);
        assert_eq!(compiled.levels[0].passes.len(), 1);
        assert_eq!(
            compiled.exit_barriers,
            vec![Barrier::Transition { resource: BACK_BUFFER_ID, before: ResourceUsage::RENDER_TARGET, after: ResourceUsage::PRESENT }]
        );
    }

    #[test]
    fn upload_buffer_gets_one_placement_per_frame_slot() {
        let mut builder = RenderGraphBuilder::new();
        let upload = builder.create_upload_buffer("u", super::super::builder::UploadHeapKind::Cpu, 256, 4);
        let pass = builder.add_render_pass("p", noop_handler, core::ptr::null());
        builder.rg_read_buffer(pass, upload, ResourceUsage::VERTEX_OR_CONSTANT, 0);

        let heap = crate::memory::os::GLOBAL_OS_ALLOCATOR.as_free_heap();
        let compiled = compile(heap, &builder, 3).expect("compile should succeed");

        assert!(!compiled.placements.contains_key(&upload.id));
        for slot in 0..3u32 {
            let placement = compiled.upload_placements.get(&(upload.id, slot)).expect("every frame slot should have a placement");
            assert_eq!(placement.arena, ArenaKind::Upload { frame_slot: slot });
        }
    }

    #[test]
    fn compile_end_to_end_places_every_transient_resource() {
        let mut builder = RenderGraphBuilder::new();
        let mut tex = builder.create_texture("t", 64, 64, TextureFormat::Rgba8Unorm, 0);
        let pass_a = builder.add_render_pass("a", noop_handler, core::ptr::null());
        let pass_b = builder.add_render_pass("b", noop_handler, core::ptr::null());
        builder.rg_write_rtv(pass_a, &mut tex);
        builder.rg_read_texture(pass_b, tex, ResourceUsage::SHADER_RESOURCE, 0);

        let heap = crate::memory::os::GLOBAL_OS_ALLOCATOR.as_free_heap();
        let compiled = compile(heap, &builder, 2).expect("compile should succeed");

        assert_eq!(compiled.levels.len(), 2);
        assert_eq!(compiled.upload_arenas.len(), 2);
        assert!(compiled.placements.contains_key(&tex.id));
        assert_eq!(compiled.resource_usage[&tex.id], ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE);
    }
}
