//! Virtual resources: the render graph's view of textures and buffers
//! before compilation decides where they actually live.

use bitflags::bitflags;

/// Identifies a resource across its whole lifetime in the graph, regardless
/// of how many times it's written (each write bumps [`ResourceVersion`]
/// instead of minting a new id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceId(pub u32);

/// `ResourceId`'s derived `Hash` impl forwards to its single `u32` field, so
/// the identity hasher `nohash_hasher` provides is exact, not an
/// approximation — ids are already dense small integers and need no mixing.
impl nohash_hasher::IsEnabled for ResourceId {}

/// Which write of a resource a pass is observing. Two accesses to the same
/// [`ResourceId`] at different versions never alias in the dependency graph
/// — they're ordered by the version bump between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceVersion(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    pub id: ResourceId,
    pub version: ResourceVersion,
    /// 0 for ordinary transient resources; `n` means `n + 1` physical
    /// copies exist, rotated by frame index.
    pub temporal_lifetime: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Texture2D,
    Texture3D,
    Buffer,
}

/// Whether a resource's physical backing needs to persist across frames
/// (history buffers, TAA accumulation) or can be torn down every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalLifetime {
    /// Lives only within the frame that created it; placed in the
    /// per-frame local arena.
    Transient,
    /// Needs `history_depth + 1` physical copies rotated by frame index.
    Temporal { history_depth: u32 },
    /// Owned externally (the swap chain back buffer); the graph only
    /// references it, never places or frees it.
    Imported,
}

bitflags! {
    /// How a resource may be used across the passes that touch it. Union
    /// of every access any pass declares; drives both physical resource
    /// flags and which barrier types are possible.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ResourceUsage: u32 {
        const RENDER_TARGET        = 1 << 0;
        const DEPTH_STENCIL        = 1 << 1;
        const SHADER_RESOURCE      = 1 << 2;
        const UNORDERED_ACCESS     = 1 << 3;
        const COPY_SOURCE          = 1 << 4;
        const COPY_DEST            = 1 << 5;
        const VERTEX_OR_CONSTANT   = 1 << 6;
        const INDEX_BUFFER         = 1 << 7;
        /// The swap chain state a back buffer must sit in before `Present`;
        /// never declared by a pass, only assigned by the compiler's exit
        /// barrier for [`super::builder::BACK_BUFFER_ID`].
        const PRESENT              = 1 << 8;
    }
}

#[derive(Debug, Clone)]
pub struct TransientResourceDesc {
    pub kind: ResourceKind,
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
    pub format: TextureFormat,
    pub lifetime: TemporalLifetime,
    /// Set by `create_upload_buffer`: placed in the rotating per-frame
    /// upload arenas instead of the local arena, since its contents are
    /// expected to be rewritten by the CPU every frame.
    pub is_upload: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    R32Float,
    D32Float,
    Bgra8UnormSrgb,
}

impl TextureFormat {
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Bgra8UnormSrgb => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::R32Float | TextureFormat::D32Float => 4,
        }
    }
}

impl TransientResourceDesc {
    /// A rough byte-size estimate used for physical placement. Render
    /// targets and depth buffers are conservatively assumed single-sample;
    /// MSAA is out of scope (see graph module docs).
    pub fn approx_byte_size(&self) -> u64 {
        match self.kind {
            ResourceKind::Buffer => u64::from(self.width),
            ResourceKind::Texture2D | ResourceKind::Texture3D => {
                u64::from(self.width) * u64::from(self.height) * u64::from(self.depth_or_array_layers) * u64::from(self.format.bytes_per_texel())
            }
        }
    }
}
