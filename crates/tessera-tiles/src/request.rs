//! Tile events sent from a worker to the controlling thread.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use tessera_math::Aabb;

use crate::lod::Lod;
use crate::sample::{MaterialId, ModelId, ObjectKind, TileId};

/// A contiguous range of a tile's index buffer.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct DrawRange {
    pub start: u32,
    pub count: u32,
}

assert_eq_size!(DrawRange, [u32; 2]);

impl DrawRange {
    pub fn end(&self) -> u32 {
        self.start + self.count
    }
}

/// An index range drawn with a highlight material.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable, Serialize, Deserialize)]
pub struct HighlightRange {
    pub start: u32,
    pub count: u32,
    pub highlight: u32,
}

assert_eq_size!(HighlightRange, [u32; 3]);

/// Packed GPU-ready buffers of a materialized tile.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TileBuffers {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub indices: Vec<u16>,
    /// Owning item per vertex, for picking on the controlling side.
    pub item_ids: Vec<u32>,
}

impl TileBuffers {
    pub fn zeroed(vertex_count: usize, index_count: usize) -> Self {
        Self {
            positions: vec![0.0; vertex_count * 3],
            normals: vec![0.0; vertex_count * 3],
            indices: vec![0; index_count],
            item_ids: vec![0; vertex_count],
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.item_ids.len()
    }

    pub fn byte_size(&self) -> usize {
        bytemuck::cast_slice::<f32, u8>(&self.positions).len()
            + bytemuck::cast_slice::<f32, u8>(&self.normals).len()
            + bytemuck::cast_slice::<u16, u8>(&self.indices).len()
            + bytemuck::cast_slice::<u32, u8>(&self.item_ids).len()
    }
}

/// Payload of a CREATE event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TileCreate {
    pub model: ModelId,
    pub tile: TileId,
    pub object_kind: ObjectKind,
    pub material: MaterialId,
    pub lod: Lod,
    pub buffers: TileBuffers,
    /// Model-to-world transform.
    pub transform: Mat4,
    pub bbox: Aabb,
    pub visibility: Vec<DrawRange>,
    pub highlights: Vec<HighlightRange>,
}

/// Payload of an UPDATE event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TileUpdate {
    pub model: ModelId,
    pub tile: TileId,
    pub visibility: Vec<DrawRange>,
    pub highlights: Vec<HighlightRange>,
}

/// Discriminant of a [`TileRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileRequestKind {
    Create,
    Update,
    Delete,
    Finish,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum TileRequest {
    Create(Box<TileCreate>),
    Update(TileUpdate),
    Delete { model: ModelId, tile: TileId },
    /// The model settled: a full scheduler pass produced no changes.
    Finish { model: ModelId },
}

impl TileRequest {
    pub fn kind(&self) -> TileRequestKind {
        match self {
            TileRequest::Create(_) => TileRequestKind::Create,
            TileRequest::Update(_) => TileRequestKind::Update,
            TileRequest::Delete { .. } => TileRequestKind::Delete,
            TileRequest::Finish { .. } => TileRequestKind::Finish,
        }
    }

    pub fn model(&self) -> ModelId {
        match self {
            TileRequest::Create(create) => create.model,
            TileRequest::Update(update) => update.model,
            TileRequest::Delete { model, .. } | TileRequest::Finish { model } => *model,
        }
    }

    /// Target tile; `None` for FINISH.
    pub fn tile(&self) -> Option<TileId> {
        match self {
            TileRequest::Create(create) => Some(create.tile),
            TileRequest::Update(update) => Some(update.tile),
            TileRequest::Delete { tile, .. } => Some(*tile),
            TileRequest::Finish { .. } => None,
        }
    }

    /// Bytes of buffer data that move with this request.
    pub fn transfer_bytes(&self) -> usize {
        match self {
            TileRequest::Create(create) => create.buffers.byte_size(),
            _ => 0,
        }
    }
}
