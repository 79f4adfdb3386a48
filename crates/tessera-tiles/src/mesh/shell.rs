//! Pre-tessellated triangle shells.

use glam::Vec3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tessera_math::Aabb;
use tracing::warn;

use super::{GeometryBuffers, MeshBuffers, MeshBuilder, SegmentSize, TemplateSize, split_for_tiles};
use crate::error::TileError;
use crate::lod::Lod;
use crate::sample::{RepresentationId, RepresentationKind};

/// Raw shell input: flat xyz positions and a triangle list.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShellTemplate {
    pub positions: Vec<f32>,
    pub indices: Vec<u32>,
}

struct PreparedShell {
    full: GeometryBuffers,
    bounds: Aabb,
}

/// Stores shells with precomputed smooth normals. The wire LOD of a shell is
/// the twelve edges of its bounding box.
#[derive(Default)]
pub struct ShellMeshBuilder {
    shells: FxHashMap<RepresentationId, PreparedShell>,
}

const BOX_EDGES: [u32; 24] = [
    0, 1, 1, 3, 3, 2, 2, 0, // min z face
    4, 5, 5, 7, 7, 6, 6, 4, // max z face
    0, 4, 1, 5, 2, 6, 3, 7,
];

impl ShellMeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a shell. Shells too large for one tile are split into
    /// segments.
    pub fn insert(&mut self, representation: RepresentationId, shell: ShellTemplate) -> Result<(), TileError> {
        let vertex_count = shell.positions.len() / 3;
        if shell.positions.len() % 3 != 0 || shell.indices.len() % 3 != 0 {
            return Err(TileError::UnsupportedInput(format!(
                "shell {representation:?} buffers are not multiples of three"
            )));
        }
        if let Some(bad) = shell.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(TileError::UnsupportedInput(format!(
                "shell {representation:?} index {bad} out of range ({vertex_count} vertices)"
            )));
        }

        let normals = smooth_normals(&shell.positions, &shell.indices);
        let parts = split_for_tiles(&shell.positions, &normals, &shell.indices, 3);
        if parts.len() > 1 {
            warn!(
                ?representation,
                segments = parts.len(),
                "shell exceeds tile limits, splitting into segments"
            );
        }
        self.shells.insert(
            representation,
            PreparedShell {
                bounds: Aabb::from_positions(&shell.positions),
                full: GeometryBuffers::from_parts(parts),
            },
        );
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.shells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shells.is_empty()
    }

    fn prepared(&self, representation: RepresentationId) -> Result<&PreparedShell, TileError> {
        self.shells
            .get(&representation)
            .ok_or(TileError::UnsupportedRepresentation(representation))
    }
}

impl MeshBuilder for ShellMeshBuilder {
    fn kind(&self) -> RepresentationKind {
        RepresentationKind::Shell
    }

    fn representations(&self) -> Vec<RepresentationId> {
        self.shells.keys().copied().collect()
    }

    fn bounds(&self, representation: RepresentationId) -> Result<Aabb, TileError> {
        Ok(self.prepared(representation)?.bounds)
    }

    fn size_template(&self, representation: RepresentationId, lod: Lod) -> Result<TemplateSize, TileError> {
        let shell = self.prepared(representation)?;
        let segments = match lod {
            Lod::Geometry => shell.full.size_template(),
            Lod::Wires => vec![SegmentSize {
                vertex_count: 8,
                index_count: BOX_EDGES.len() as u32,
                normal_count: 8,
            }],
            Lod::Invisible => {
                return Err(TileError::UnsupportedInput(
                    "invisible LOD has no geometry".to_string(),
                ));
            }
        };
        Ok(TemplateSize {
            segments,
            lod_thickness: None,
        })
    }

    fn build(&self, representation: RepresentationId, lod: Lod) -> Result<GeometryBuffers, TileError> {
        let shell = self.prepared(representation)?;
        match lod {
            Lod::Geometry => Ok(shell.full.clone()),
            Lod::Wires => {
                let corners = shell.bounds.corners();
                Ok(GeometryBuffers::Single(MeshBuffers {
                    positions: corners.iter().flat_map(|c| c.to_array()).collect(),
                    normals: vec![0.0; 24],
                    indices: BOX_EDGES.to_vec(),
                }))
            }
            Lod::Invisible => Err(TileError::UnsupportedInput(
                "invisible LOD has no geometry".to_string(),
            )),
        }
    }
}

fn smooth_normals(positions: &[f32], indices: &[u32]) -> Vec<f32> {
    let vertex = |i: u32| {
        let b = i as usize * 3;
        Vec3::new(positions[b], positions[b + 1], positions[b + 2])
    };
    let mut accum = vec![Vec3::ZERO; positions.len() / 3];
    for tri in indices.chunks_exact(3) {
        let (a, b, c) = (vertex(tri[0]), vertex(tri[1]), vertex(tri[2]));
        // Area-weighted.
        let face = (b - a).cross(c - a);
        for &i in tri {
            accum[i as usize] += face;
        }
    }
    accum
        .into_iter()
        .flat_map(|n| n.normalize_or_zero().to_array())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> ShellTemplate {
        ShellTemplate {
            positions: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    #[test]
    fn test_size_template_matches_build() {
        let mut builder = ShellMeshBuilder::new();
        builder.insert(RepresentationId(1), quad()).unwrap();
        for lod in Lod::DRAWN {
            let size = builder.size_template(RepresentationId(1), lod).unwrap();
            let built = builder.build(RepresentationId(1), lod).unwrap();
            assert_eq!(size.segments, built.size_template(), "{lod:?}");
        }
    }

    #[test]
    fn test_quad_normals_point_up_z() {
        let mut builder = ShellMeshBuilder::new();
        builder.insert(RepresentationId(1), quad()).unwrap();
        let built = builder.build_full(RepresentationId(1)).unwrap();
        for n in built.segments()[0].normals.chunks_exact(3) {
            assert!((n[2] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_wire_lod_is_box_edges() {
        let mut builder = ShellMeshBuilder::new();
        builder.insert(RepresentationId(1), quad()).unwrap();
        let wires = builder.build_lod(RepresentationId(1)).unwrap();
        assert_eq!(wires.segments()[0].vertex_count(), 8);
        assert_eq!(wires.segments()[0].index_count(), 24);
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        let mut builder = ShellMeshBuilder::new();
        let mut shell = quad();
        shell.indices[5] = 9;
        assert!(matches!(
            builder.insert(RepresentationId(1), shell),
            Err(TileError::UnsupportedInput(_))
        ));
    }

    #[test]
    fn test_unknown_representation() {
        let builder = ShellMeshBuilder::new();
        assert_eq!(
            builder.build_full(RepresentationId(4)),
            Err(TileError::UnsupportedRepresentation(RepresentationId(4)))
        );
    }
}
