//! Circles swept along polyline axes.
//!
//! Full geometry is one open cylinder per axis segment. The wire LOD is the
//! axis polyline itself, which is also why these builders report a thickness
//! proxy: a pipe that is long on screen but only a pixel wide is drawn as a
//! line.

use glam::Vec3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tessera_math::Aabb;
use tracing::warn;

use super::{
    GeometryBuffers, MeshBuffers, MeshBuilder, SegmentSize, TILE_ELEMENT_LIMIT, TemplateSize,
    split_for_tiles,
};
use crate::error::TileError;
use crate::lod::Lod;
use crate::sample::{RepresentationId, RepresentationKind};

/// Radial vertex count of each ring.
pub const DEFAULT_RADIAL_SEGMENTS: u32 = 8;

/// A circle of `radius` swept along `axis`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CircleExtrusion {
    pub axis: Vec<Vec3>,
    pub radius: f32,
}

impl CircleExtrusion {
    fn bounds(&self) -> Aabb {
        let mut bounds = Aabb::from_points(self.axis.iter().copied());
        if !bounds.is_empty() {
            bounds.min -= Vec3::splat(self.radius);
            bounds.max += Vec3::splat(self.radius);
        }
        bounds
    }
}

pub struct CircleExtrusionMeshBuilder {
    extrusions: FxHashMap<RepresentationId, CircleExtrusion>,
    radial_segments: u32,
}

impl Default for CircleExtrusionMeshBuilder {
    fn default() -> Self {
        Self {
            extrusions: FxHashMap::default(),
            radial_segments: DEFAULT_RADIAL_SEGMENTS,
        }
    }
}

impl CircleExtrusionMeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_radial_segments(mut self, radial_segments: u32) -> Self {
        self.radial_segments = radial_segments.max(3);
        self
    }

    pub fn insert(&mut self, representation: RepresentationId, extrusion: CircleExtrusion) -> Result<(), TileError> {
        if extrusion.axis.len() < 2 || extrusion.radius.is_nan() || extrusion.radius <= 0.0 {
            return Err(TileError::UnsupportedInput(format!(
                "extrusion {representation:?} needs two axis points and a positive radius"
            )));
        }
        self.extrusions.insert(representation, extrusion);
        Ok(())
    }

    fn extrusion(&self, representation: RepresentationId) -> Result<&CircleExtrusion, TileError> {
        self.extrusions
            .get(&representation)
            .ok_or(TileError::UnsupportedRepresentation(representation))
    }

    fn tube_segment_size(&self) -> SegmentSize {
        SegmentSize {
            vertex_count: 2 * self.radial_segments,
            index_count: 6 * self.radial_segments,
            normal_count: 2 * self.radial_segments,
        }
    }

    /// How many axis segments fit into one tile segment.
    fn segments_per_part(&self) -> usize {
        let size = self.tube_segment_size();
        (TILE_ELEMENT_LIMIT / size.vertex_count.max(size.index_count) as usize).max(1)
    }

    fn part_sizes(&self, axis_segments: usize) -> Vec<SegmentSize> {
        let per_part = self.segments_per_part();
        let unit = self.tube_segment_size();
        let mut sizes = Vec::new();
        let mut remaining = axis_segments;
        while remaining > 0 {
            let n = remaining.min(per_part) as u32;
            sizes.push(SegmentSize {
                vertex_count: unit.vertex_count * n,
                index_count: unit.index_count * n,
                normal_count: unit.normal_count * n,
            });
            remaining -= n as usize;
        }
        sizes
    }

    fn build_tube(&self, extrusion: &CircleExtrusion) -> GeometryBuffers {
        let per_part = self.segments_per_part();
        let segment_count = extrusion.axis.len() - 1;
        if segment_count > per_part {
            warn!(
                axis_points = extrusion.axis.len(),
                "extrusion exceeds tile limits, splitting into segments"
            );
        }
        let radial = self.radial_segments;
        let mut parts = Vec::new();
        let mut current = MeshBuffers::default();
        for (n, pair) in extrusion.axis.windows(2).enumerate() {
            if n > 0 && n % per_part == 0 {
                parts.push(std::mem::take(&mut current));
            }
            let (a, b) = (pair[0], pair[1]);
            let dir = (b - a).normalize_or(Vec3::Y);
            let (u, v) = dir.any_orthonormal_pair();
            let base = current.vertex_count() as u32;
            for center in [a, b] {
                for k in 0..radial {
                    let angle = k as f32 / radial as f32 * std::f32::consts::TAU;
                    let normal = u * angle.cos() + v * angle.sin();
                    current
                        .positions
                        .extend_from_slice(&(center + normal * extrusion.radius).to_array());
                    current.normals.extend_from_slice(&normal.to_array());
                }
            }
            for k in 0..radial {
                let next = (k + 1) % radial;
                let (a0, a1) = (base + k, base + next);
                let (b0, b1) = (base + radial + k, base + radial + next);
                current.indices.extend_from_slice(&[a0, a1, b1, a0, b1, b0]);
            }
        }
        parts.push(current);
        GeometryBuffers::from_parts(parts)
    }

    fn build_axis(extrusion: &CircleExtrusion) -> GeometryBuffers {
        let count = extrusion.axis.len() as u32;
        let positions: Vec<f32> = extrusion.axis.iter().flat_map(|p| p.to_array()).collect();
        let normals = vec![0.0; positions.len()];
        let indices: Vec<u32> = (0..count - 1).flat_map(|i| [i, i + 1]).collect();
        GeometryBuffers::from_parts(split_for_tiles(&positions, &normals, &indices, 2))
    }
}

impl MeshBuilder for CircleExtrusionMeshBuilder {
    fn kind(&self) -> RepresentationKind {
        RepresentationKind::CircleExtrusion
    }

    fn representations(&self) -> Vec<RepresentationId> {
        self.extrusions.keys().copied().collect()
    }

    fn bounds(&self, representation: RepresentationId) -> Result<Aabb, TileError> {
        Ok(self.extrusion(representation)?.bounds())
    }

    fn size_template(&self, representation: RepresentationId, lod: Lod) -> Result<TemplateSize, TileError> {
        let extrusion = self.extrusion(representation)?;
        let segments = match lod {
            Lod::Geometry => self.part_sizes(extrusion.axis.len() - 1),
            Lod::Wires => Self::build_axis(extrusion).size_template(),
            Lod::Invisible => {
                return Err(TileError::UnsupportedInput(
                    "invisible LOD has no geometry".to_string(),
                ));
            }
        };
        Ok(TemplateSize {
            segments,
            lod_thickness: Some(extrusion.radius * 2.0),
        })
    }

    fn build(&self, representation: RepresentationId, lod: Lod) -> Result<GeometryBuffers, TileError> {
        let extrusion = self.extrusion(representation)?;
        match lod {
            Lod::Geometry => Ok(self.build_tube(extrusion)),
            Lod::Wires => Ok(Self::build_axis(extrusion)),
            Lod::Invisible => Err(TileError::UnsupportedInput(
                "invisible LOD has no geometry".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe(points: usize) -> CircleExtrusion {
        CircleExtrusion {
            axis: (0..points).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect(),
            radius: 0.1,
        }
    }

    #[test]
    fn test_size_template_matches_build() {
        let mut builder = CircleExtrusionMeshBuilder::new();
        builder.insert(RepresentationId(2), pipe(4)).unwrap();
        for lod in Lod::DRAWN {
            let size = builder.size_template(RepresentationId(2), lod).unwrap();
            let built = builder.build(RepresentationId(2), lod).unwrap();
            assert_eq!(size.segments, built.size_template(), "{lod:?}");
            assert_eq!(size.lod_thickness, Some(0.2));
        }
    }

    #[test]
    fn test_long_axis_is_segmented() {
        let mut builder = CircleExtrusionMeshBuilder::new();
        builder.insert(RepresentationId(2), pipe(10_000)).unwrap();
        let size = builder.size_template(RepresentationId(2), Lod::Geometry).unwrap();
        assert!(size.segments.len() > 1);
        let built = builder.build_full(RepresentationId(2)).unwrap();
        assert!(matches!(built, GeometryBuffers::Segmented(_)));
        assert_eq!(size.segments, built.size_template());
        for part in built.segments() {
            assert!(part.vertex_count() <= TILE_ELEMENT_LIMIT);
            assert!(part.index_count() <= TILE_ELEMENT_LIMIT);
        }
    }

    #[test]
    fn test_ring_vertices_lie_on_radius() {
        let mut builder = CircleExtrusionMeshBuilder::new();
        builder.insert(RepresentationId(2), pipe(2)).unwrap();
        let built = builder.build_full(RepresentationId(2)).unwrap();
        for p in built.segments()[0].positions.chunks_exact(3) {
            let off_axis = Vec3::new(0.0, p[1], p[2]).length();
            assert!((off_axis - 0.1).abs() < 1e-5);
        }
    }

    #[test]
    fn test_rejects_degenerate_axis() {
        let mut builder = CircleExtrusionMeshBuilder::new();
        assert!(builder.insert(RepresentationId(2), pipe(1)).is_err());
    }
}
