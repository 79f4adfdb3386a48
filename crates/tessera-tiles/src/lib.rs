//! Tile-based LOD streaming core.
//!
//! Samples (placed instances of shared representations) are grouped into
//! render tiles by material, LOD, spatial cell and size. A per-model
//! [`TileScheduler`] classifies samples each tick from the current [`View`]
//! and emits [`TileRequest`]s describing which tiles to create, update or
//! delete. Template geometry is generated by [`MeshBuilder`]s and shared
//! through a size-aware LRU [`TileCache`] owned by the worker's
//! [`WorkerRuntime`].

pub mod bucket;
pub mod cache;
pub mod error;
pub mod item_state;
pub mod lod;
pub mod mesh;
pub mod request;
pub mod run_length;
pub mod runtime;
pub mod sample;
pub mod scheduler;
pub mod tile;
pub mod view;

pub use bucket::BucketKey;
pub use cache::{CacheCode, CacheStats, TileCache};
pub use error::TileError;
pub use item_state::{ItemState, NO_HIGHLIGHT};
pub use lod::{Lod, LodClassifier, LodInput};
pub use mesh::{
    CircleExtrusion, CircleExtrusionMeshBuilder, GeometryBuffers, MeshBuffers, MeshBuilder, MeshBuilders,
    SegmentSize, ShellMeshBuilder, ShellTemplate, TILE_ELEMENT_LIMIT, TemplateSize,
};
pub use request::{
    DrawRange, HighlightRange, TileBuffers, TileCreate, TileRequest, TileRequestKind, TileUpdate,
};
pub use run_length::{RUN_TO_END, Run, RunLengthState};
pub use runtime::WorkerRuntime;
pub use sample::{
    ItemId, MaterialId, ModelId, ObjectKind, RepresentationId, RepresentationKind, Sample, SampleId, TileId,
};
pub use scheduler::{GeometryEdit, TileScheduler, UpdateStats};
pub use tile::{Tile, TileSlot};
pub use view::{Projection, View};

#[cfg(test)]
mod streaming_tests;
