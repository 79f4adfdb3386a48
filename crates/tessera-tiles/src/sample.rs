//! Identifiers and the immutable per-sample record.

use glam::Mat4;
use serde::{Deserialize, Serialize};
use tessera_math::Aabb;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);
    };
}

id_type!(
    /// A loaded model.
    ModelId
);
id_type!(
    /// A logical entity of a model; owns zero or more samples.
    ItemId
);
id_type!(
    /// One placed instance of one representation.
    SampleId
);
id_type!(
    /// A shape definition (geometry id) shared by samples.
    RepresentationId
);
id_type!(
    /// A material slot.
    MaterialId
);
id_type!(
    /// A render tile, unique within a model.
    TileId
);

/// Kind tag of a representation; selects the mesh builder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RepresentationKind {
    /// Pre-tessellated triangle shell.
    Shell,
    /// A circle swept along a polyline axis (pipes, rebars, cables).
    CircleExtrusion,
}

/// Primitive type of a tile's index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectKind {
    /// Triangle list.
    Shell,
    /// Line list.
    Line,
}

/// The atomic renderable unit.
///
/// `bbox` is in model space (the representation box transformed by
/// `transform`) and is computed once at construction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub item: ItemId,
    pub representation: RepresentationId,
    pub material: MaterialId,
    pub transform: Mat4,
    pub bbox: Aabb,
}

impl Sample {
    /// Place a representation whose local bounds are `local_box`.
    pub fn new(
        id: SampleId,
        item: ItemId,
        representation: RepresentationId,
        material: MaterialId,
        transform: Mat4,
        local_box: &Aabb,
    ) -> Self {
        Self {
            id,
            item,
            representation,
            material,
            transform,
            bbox: local_box.transformed(&transform),
        }
    }

    /// Largest axis scale of the transform; scales template-space lengths.
    pub fn scale_factor(&self) -> f32 {
        let (scale, _, _) = self.transform.to_scale_rotation_translation();
        scale.abs().max_element()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_sample_box_is_transformed() {
        let local = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let sample = Sample::new(
            SampleId(1),
            ItemId(7),
            RepresentationId(3),
            MaterialId(0),
            Mat4::from_scale_rotation_translation(
                Vec3::splat(2.0),
                glam::Quat::IDENTITY,
                Vec3::new(5.0, 0.0, 0.0),
            ),
            &local,
        );
        assert_eq!(sample.bbox.min, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(sample.bbox.max, Vec3::new(7.0, 2.0, 2.0));
        assert!((sample.scale_factor() - 2.0).abs() < 1e-6);
    }
}
