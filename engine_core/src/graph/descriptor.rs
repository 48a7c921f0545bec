//! Descriptor type inference and a bump allocator for the per-frame
//! descriptor heap a compiled graph needs.
//!
//! A resource's set of declared [`ResourceUsage`] flags across every pass
//! that touches it determines which descriptor kinds must exist for it;
//! a resource read as both a shader resource and written as a render
//! target needs two descriptors, not one that's overwritten.

use super::resource::ResourceUsage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    RenderTargetView,
    DepthStencilView,
    ShaderResourceView,
    UnorderedAccessView,
    ConstantBufferView,
}

/// Maps the usage flags a resource accumulated across the graph to the
/// descriptor kinds it needs. Order is stable (matches [`DescriptorType`]
/// declaration order) so allocation is deterministic across runs with the
/// same graph shape.
pub fn descriptor_types_for_usage(usage: ResourceUsage) -> Vec<DescriptorType> {
    let mut kinds = Vec::new();
    if usage.contains(ResourceUsage::RENDER_TARGET) {
        kinds.push(DescriptorType::RenderTargetView);
    }
    if usage.contains(ResourceUsage::DEPTH_STENCIL) {
        kinds.push(DescriptorType::DepthStencilView);
    }
    if usage.contains(ResourceUsage::SHADER_RESOURCE) {
        kinds.push(DescriptorType::ShaderResourceView);
    }
    if usage.contains(ResourceUsage::UNORDERED_ACCESS) {
        kinds.push(DescriptorType::UnorderedAccessView);
    }
    if usage.contains(ResourceUsage::VERTEX_OR_CONSTANT) {
        kinds.push(DescriptorType::ConstantBufferView);
    }
    kinds
}

/// A bump-allocated table of descriptor slots for one compiled frame.
/// Descriptors never get freed mid-frame; the whole table resets once
/// the frame retires, same lifetime as the frame's local resource arena.
pub struct DescriptorTable {
    slots: Vec<DescriptorType>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorIndex(pub u32);

impl DescriptorTable {
    pub fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub fn allocate(&mut self, kind: DescriptorType) -> DescriptorIndex {
        let index = DescriptorIndex(self.slots.len() as u32);
        self.slots.push(kind);
        index
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn kind_at(&self, index: DescriptorIndex) -> Option<DescriptorType> {
        self.slots.get(index.0 as usize).copied()
    }
}

impl Default for DescriptorTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_maps_to_every_descriptor_it_implies() {
        let usage = ResourceUsage::RENDER_TARGET | ResourceUsage::SHADER_RESOURCE;
        let kinds = descriptor_types_for_usage(usage);
        assert_eq!(kinds, vec![DescriptorType::RenderTargetView, DescriptorType::ShaderResourceView]);
    }

    #[test]
    fn table_allocation_is_sequential() {
        let mut table = DescriptorTable::new();
        let a = table.allocate(DescriptorType::RenderTargetView);
        let b = table.allocate(DescriptorType::ShaderResourceView);
        assert_eq!(a, DescriptorIndex(0));
        assert_eq!(b, DescriptorIndex(1));
        assert_eq!(table.len(), 2);
    }
}
