//! Deterministic grouping keys for tile membership.

use std::hash::{Hash, Hasher};

use glam::{IVec3, Vec3};
use rustc_hash::FxHasher;

use crate::lod::Lod;
use crate::sample::{MaterialId, ObjectKind};

/// Inputs that decide which tile a sample segment joins.
///
/// Samples sharing kind, material and LOD, lying in the same spatial cell
/// and of similar size end up in the same tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub object_kind: ObjectKind,
    pub material: MaterialId,
    pub lod: Lod,
    pub cell: IVec3,
    /// `floor(log2(dimension))`.
    pub size_class: i32,
}

impl BucketKey {
    pub fn new(object_kind: ObjectKind, material: MaterialId, lod: Lod, center: Vec3, dimension: f32, cell_size: f32) -> Self {
        Self {
            object_kind,
            material,
            lod,
            cell: (center / cell_size.max(f32::EPSILON)).floor().as_ivec3(),
            size_class: dimension.max(1e-3).log2().floor() as i32,
        }
    }

    /// Stable 64-bit code. `FxHasher` has no random state, so codes are
    /// identical across runs and threads.
    pub fn code(&self) -> u64 {
        let mut hasher = FxHasher::default();
        self.hash(&mut hasher);
        hasher.finish()
    }
}
