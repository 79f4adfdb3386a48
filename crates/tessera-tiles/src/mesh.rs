//! Mesh templates and the builders that turn representations into them.
//!
//! A builder answers two questions per (representation, LOD): how big the
//! output will be ([`MeshBuilder::size_template`], used by the first tiling
//! pass) and what the output is ([`MeshBuilder::build`], used when a tile is
//! materialized). Sizes must match what `build` later produces.

mod circle_extrusion;
mod shell;

pub use circle_extrusion::{CircleExtrusion, CircleExtrusionMeshBuilder};
pub use shell::{ShellMeshBuilder, ShellTemplate};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tessera_math::Aabb;

use crate::error::TileError;
use crate::lod::Lod;
use crate::sample::{RepresentationId, RepresentationKind};

/// Maximum vertices and indices a single tile may hold (16-bit indices).
pub const TILE_ELEMENT_LIMIT: usize = 1 << 16;

/// One contiguous mesh segment in template (representation-local) space.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshBuffers {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub indices: Vec<u32>,
}

impl MeshBuffers {
    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    pub fn byte_size(&self) -> usize {
        (self.positions.len() + self.normals.len()) * size_of::<f32>()
            + self.indices.len() * size_of::<u32>()
    }

    pub fn size(&self) -> SegmentSize {
        SegmentSize {
            vertex_count: self.vertex_count() as u32,
            index_count: self.index_count() as u32,
            normal_count: (self.normals.len() / 3) as u32,
        }
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_positions(&self.positions)
    }
}

/// Builder output: one segment, or several when a template would overflow a tile.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum GeometryBuffers {
    Single(MeshBuffers),
    Segmented(Vec<MeshBuffers>),
}

impl GeometryBuffers {
    pub fn segments(&self) -> &[MeshBuffers] {
        match self {
            GeometryBuffers::Single(mesh) => std::slice::from_ref(mesh),
            GeometryBuffers::Segmented(parts) => parts,
        }
    }

    /// Total byte length of all buffers; never zero so the cache can account
    /// empty templates.
    pub fn byte_size(&self) -> usize {
        self.segments()
            .iter()
            .map(MeshBuffers::byte_size)
            .sum::<usize>()
            .max(1)
    }

    pub fn size_template(&self) -> Vec<SegmentSize> {
        self.segments().iter().map(MeshBuffers::size).collect()
    }

    fn from_parts(mut parts: Vec<MeshBuffers>) -> Self {
        if parts.len() == 1 {
            GeometryBuffers::Single(parts.remove(0))
        } else {
            GeometryBuffers::Segmented(parts)
        }
    }
}

/// Element counts of one template segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentSize {
    pub vertex_count: u32,
    pub index_count: u32,
    pub normal_count: u32,
}

/// Size answer for a (representation, LOD) pair.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TemplateSize {
    pub segments: Vec<SegmentSize>,
    /// Characteristic thickness in template units, used as the LOD proxy.
    pub lod_thickness: Option<f32>,
}

/// Generates template geometry for one representation kind.
pub trait MeshBuilder: Send + Sync {
    fn kind(&self) -> RepresentationKind;

    /// Representation ids this builder holds data for.
    fn representations(&self) -> Vec<RepresentationId>;

    /// Local bounds of a representation.
    fn bounds(&self, representation: RepresentationId) -> Result<Aabb, TileError>;

    fn size_template(&self, representation: RepresentationId, lod: Lod) -> Result<TemplateSize, TileError>;

    fn build(&self, representation: RepresentationId, lod: Lod) -> Result<GeometryBuffers, TileError>;

    fn build_full(&self, representation: RepresentationId) -> Result<GeometryBuffers, TileError> {
        self.build(representation, Lod::Geometry)
    }

    fn build_lod(&self, representation: RepresentationId) -> Result<GeometryBuffers, TileError> {
        self.build(representation, Lod::Wires)
    }
}

/// Builder registry selecting a builder by the representation's kind tag.
#[derive(Default)]
pub struct MeshBuilders {
    builders: Vec<Box<dyn MeshBuilder>>,
    kinds: FxHashMap<RepresentationId, RepresentationKind>,
}

impl MeshBuilders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a builder and tag all of its representations with its kind.
    ///
    /// A later builder of the same kind replaces the earlier one.
    pub fn register(&mut self, builder: Box<dyn MeshBuilder>) {
        let kind = builder.kind();
        self.kinds.retain(|_, k| *k != kind);
        for representation in builder.representations() {
            self.kinds.insert(representation, kind);
        }
        self.builders.retain(|b| b.kind() != kind);
        self.builders.push(builder);
    }

    pub fn with(mut self, builder: impl MeshBuilder + 'static) -> Self {
        self.register(Box::new(builder));
        self
    }

    pub fn kind_of(&self, representation: RepresentationId) -> Result<RepresentationKind, TileError> {
        self.kinds
            .get(&representation)
            .copied()
            .ok_or(TileError::UnsupportedRepresentation(representation))
    }

    pub fn builder_for(&self, representation: RepresentationId) -> Result<&dyn MeshBuilder, TileError> {
        let kind = self.kind_of(representation)?;
        self.builders
            .iter()
            .find(|b| b.kind() == kind)
            .map(|b| b.as_ref())
            .ok_or(TileError::UnsupportedRepresentation(representation))
    }
}

/// Split a triangle or line list into parts that each fit a tile.
///
/// `stride` is the primitive size (3 for triangles, 2 for lines). Vertices
/// referenced by a part are copied and reindexed into it.
pub(crate) fn split_for_tiles(
    positions: &[f32],
    normals: &[f32],
    indices: &[u32],
    stride: usize,
) -> Vec<MeshBuffers> {
    let vertex_count = positions.len() / 3;
    if vertex_count <= TILE_ELEMENT_LIMIT && indices.len() <= TILE_ELEMENT_LIMIT {
        return vec![MeshBuffers {
            positions: positions.to_vec(),
            normals: normals.to_vec(),
            indices: indices.to_vec(),
        }];
    }

    let mut parts = Vec::new();
    let mut current = MeshBuffers::default();
    let mut remap: FxHashMap<u32, u32> = FxHashMap::default();
    for primitive in indices.chunks_exact(stride) {
        let fresh = primitive.iter().filter(|i| !remap.contains_key(i)).count();
        if current.vertex_count() + fresh > TILE_ELEMENT_LIMIT
            || current.indices.len() + stride > TILE_ELEMENT_LIMIT
        {
            parts.push(std::mem::take(&mut current));
            remap.clear();
        }
        for &old in primitive {
            let new = *remap.entry(old).or_insert_with(|| {
                let base = old as usize * 3;
                current.positions.extend_from_slice(&positions[base..base + 3]);
                if normals.len() >= base + 3 {
                    current.normals.extend_from_slice(&normals[base..base + 3]);
                }
                (current.positions.len() / 3 - 1) as u32
            });
            current.indices.push(new);
        }
    }
    if !current.indices.is_empty() {
        parts.push(current);
    }
    parts
}
