//! Spatial index over sample bounding boxes.
//!
//! [`Bvh`] is a median-split bounding volume hierarchy built once per model
//! (and rebuilt after geometry edits). Query results are deterministic:
//! entries come back in ascending sample id order.

use tessera_math::{Aabb, Frustum, PlaneSide, Ray};
use tessera_tiles::{ItemId, Sample, SampleId};

/// One indexed box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxEntry {
    pub sample: SampleId,
    pub item: ItemId,
    pub bounds: Aabb,
}

impl BoxEntry {
    pub fn from_sample(sample: &Sample) -> Self {
        Self {
            sample: sample.id,
            item: sample.item,
            bounds: sample.bbox,
        }
    }
}

/// An entry touched by a frustum query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrustumMatch {
    pub entry: BoxEntry,
    /// The whole box is inside the frustum.
    pub contained: bool,
}

/// Coarse collision queries over sample boxes.
pub trait SpatialBoxIndex: Send {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries whose box the ray enters, with the entry distance.
    fn query_ray(&self, ray: &Ray) -> Vec<(BoxEntry, f32)>;

    /// Entries whose box intersects the frustum.
    fn query_frustum(&self, frustum: &Frustum) -> Vec<FrustumMatch>;
}

const LEAF_MAX: usize = 8;

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        bounds: Aabb,
        entries: Vec<BoxEntry>,
    },
    Internal {
        bounds: Aabb,
        left: usize,
        right: usize,
    },
}

impl Node {
    fn bounds(&self) -> &Aabb {
        match self {
            Node::Leaf { bounds, .. } | Node::Internal { bounds, .. } => bounds,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bvh {
    nodes: Vec<Node>,
    len: usize,
}

impl Bvh {
    /// Build over `entries`. Entries with empty boxes are dropped.
    pub fn build(entries: Vec<BoxEntry>) -> Self {
        let mut entries: Vec<BoxEntry> = entries.into_iter().filter(|e| !e.bounds.is_empty()).collect();
        let len = entries.len();
        let mut nodes = Vec::new();
        if !entries.is_empty() {
            build_node(&mut nodes, &mut entries);
        }
        Self { nodes, len }
    }

    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        Self::build(samples.into_iter().map(BoxEntry::from_sample).collect())
    }

    /// Depth-first walk visiting only nodes accepted by `enter`.
    fn walk(&self, mut enter: impl FnMut(&Aabb) -> bool, mut visit: impl FnMut(&BoxEntry)) {
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            if !enter(node.bounds()) {
                continue;
            }
            match node {
                Node::Leaf { entries, .. } => entries.iter().for_each(&mut visit),
                Node::Internal { left, right, .. } => {
                    stack.push(*right);
                    stack.push(*left);
                }
            }
        }
    }
}

impl SpatialBoxIndex for Bvh {
    fn len(&self) -> usize {
        self.len
    }

    fn query_ray(&self, ray: &Ray) -> Vec<(BoxEntry, f32)> {
        let mut hits = Vec::new();
        self.walk(
            |bounds| ray.intersect_aabb(bounds).is_some(),
            |entry| {
                if let Some(t) = ray.intersect_aabb(&entry.bounds) {
                    hits.push((*entry, t));
                }
            },
        );
        hits.sort_by_key(|(entry, _)| entry.sample);
        hits
    }

    fn query_frustum(&self, frustum: &Frustum) -> Vec<FrustumMatch> {
        let mut hits = Vec::new();
        self.walk(
            |bounds| frustum.intersects_aabb(bounds),
            |entry| {
                let mut contained = true;
                for plane in frustum.planes() {
                    match plane.classify(&entry.bounds) {
                        PlaneSide::Back => return,
                        PlaneSide::Straddling => contained = false,
                        PlaneSide::Front => {}
                    }
                }
                hits.push(FrustumMatch {
                    entry: *entry,
                    contained,
                });
            },
        );
        hits.sort_by_key(|m| m.entry.sample);
        hits
    }
}

fn build_node(nodes: &mut Vec<Node>, entries: &mut [BoxEntry]) -> usize {
    let bounds = entries
        .iter()
        .fold(Aabb::default(), |acc, e| acc.union(&e.bounds));

    if entries.len() <= LEAF_MAX {
        let idx = nodes.len();
        nodes.push(Node::Leaf {
            bounds,
            entries: entries.to_vec(),
        });
        return idx;
    }

    let axis = split_axis(&bounds);
    entries.sort_by(|a, b| {
        let ca = a.bounds.center()[axis];
        let cb = b.bounds.center()[axis];
        ca.total_cmp(&cb).then_with(|| a.sample.cmp(&b.sample))
    });

    let mid = entries.len() / 2;
    let (left_entries, right_entries) = entries.split_at_mut(mid);

    let idx = nodes.len();
    // Placeholder until both children exist.
    nodes.push(Node::Leaf {
        bounds,
        entries: Vec::new(),
    });
    let left = build_node(nodes, left_entries);
    let right = build_node(nodes, right_entries);
    nodes[idx] = Node::Internal { bounds, left, right };
    idx
}

/// Longest axis; ties prefer X, then Y.
fn split_axis(bounds: &Aabb) -> usize {
    let size = bounds.size();
    if size.x >= size.y && size.x >= size.z {
        0
    } else if size.y >= size.z {
        1
    } else {
        2
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;
    use tessera_math::Plane;

    use super::*;

    fn entry(id: u32, min: Vec3) -> BoxEntry {
        BoxEntry {
            sample: SampleId(id),
            item: ItemId(id / 2),
            bounds: Aabb::new(min, min + Vec3::ONE),
        }
    }

    fn grid(n: u32) -> Vec<BoxEntry> {
        (0..n)
            .map(|i| entry(i, Vec3::new((i % 10) as f32 * 2.0, (i / 10) as f32 * 2.0, 0.0)))
            .collect()
    }

    #[test]
    fn test_empty_index() {
        let bvh = Bvh::build(Vec::new());
        assert!(bvh.is_empty());
        assert!(bvh.query_ray(&Ray::new(Vec3::ZERO, Vec3::X)).is_empty());
    }

    #[test]
    fn test_empty_boxes_not_indexed() {
        let mut entries = grid(3);
        entries[1].bounds = Aabb::default();
        assert_eq!(Bvh::build(entries).len(), 2);
    }

    /// The tree answers exactly what a linear scan would.
    #[test]
    fn test_ray_query_matches_linear_scan() {
        let entries = grid(100);
        let bvh = Bvh::build(entries.clone());
        let ray = Ray::new(Vec3::new(-5.0, 0.5, 0.5), Vec3::new(1.0, 0.3, 0.0));
        let expected: Vec<SampleId> = entries
            .iter()
            .filter(|e| ray.intersect_aabb(&e.bounds).is_some())
            .map(|e| e.sample)
            .collect();
        let actual: Vec<SampleId> = bvh.query_ray(&ray).iter().map(|(e, _)| e.sample).collect();
        assert!(!expected.is_empty());
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_ray_query_reports_entry_distance() {
        let bvh = Bvh::build(vec![entry(0, Vec3::new(4.0, 0.0, 0.0))]);
        let hits = bvh.query_ray(&Ray::new(Vec3::new(0.0, 0.5, 0.5), Vec3::X));
        assert_eq!(hits.len(), 1);
        assert!((hits[0].1 - 4.0).abs() < 1e-5);
    }

    #[test]
    fn test_frustum_query_flags_containment() {
        let bvh = Bvh::build(grid(20));
        // Slab 0.5 <= x <= 3.5 covering every row.
        let frustum = Frustum::from_planes(vec![
            Plane::from_normal_and_point(Vec3::X, Vec3::new(0.5, 0.0, 0.0)),
            Plane::from_normal_and_point(Vec3::NEG_X, Vec3::new(3.5, 0.0, 0.0)),
        ]);
        let hits = bvh.query_frustum(&frustum);
        let touched: Vec<u32> = hits.iter().map(|m| m.entry.sample.0).collect();
        assert_eq!(touched, vec![0, 1, 10, 11]);
        let contained: Vec<u32> = hits.iter().filter(|m| m.contained).map(|m| m.entry.sample.0).collect();
        assert_eq!(contained, vec![1, 11]);
    }
}
