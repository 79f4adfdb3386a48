use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};

/// Axis-aligned bounding box in model-local f32 space.
///
/// An empty box has `min = +inf` and `max = -inf` so that the first
/// [`expand_point`](Self::expand_point) collapses it onto the point.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create an AABB from two corners, sorting components so that
    /// `min <= max` on every axis.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// The empty box (contains nothing, identity for [`union`](Self::union)).
    pub const fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::INFINITY),
            max: Vec3::splat(f32::NEG_INFINITY),
        }
    }

    /// Smallest box enclosing all `points`. Empty input yields [`Aabb::empty`].
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Self {
        let mut aabb = Self::empty();
        for p in points {
            aabb.expand_point(p);
        }
        aabb
    }

    /// Box enclosing a flat `[x, y, z, x, y, z, ...]` position buffer.
    pub fn from_positions(positions: &[f32]) -> Self {
        Self::from_points(
            positions
                .chunks_exact(3)
                .map(|c| Vec3::new(c[0], c[1], c[2])),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grow the box so it contains `p`.
    pub fn expand_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Returns the smallest AABB enclosing both `self` and `other`.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Size along each axis.
    pub fn size(&self) -> Vec3 {
        if self.is_empty() {
            Vec3::ZERO
        } else {
            self.max - self.min
        }
    }

    /// Length of the box diagonal, used as the sample's characteristic dimension.
    pub fn dimension(&self) -> f32 {
        self.size().length()
    }

    /// Largest edge length.
    pub fn max_extent(&self) -> f32 {
        self.size().max_element()
    }

    /// Returns true if the point lies inside or on the boundary.
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    /// Returns true if `other` lies entirely inside `self`.
    pub fn contains_aabb(&self, other: &Aabb) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Returns true if the boxes overlap (including touching faces).
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Squared distance from `p` to the closest point of the box (0 inside).
    pub fn distance_squared_to_point(&self, p: Vec3) -> f32 {
        let clamped = p.clamp(self.min, self.max);
        clamped.distance_squared(p)
    }

    /// The eight corners, ordered by the bit pattern `(x, y, z)` of max-selection.
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// Axis-aligned box enclosing this box after applying `transform`.
    pub fn transformed(&self, transform: &Mat4) -> Aabb {
        if self.is_empty() {
            return *self;
        }
        Aabb::from_points(
            self.corners()
                .into_iter()
                .map(|c| transform.transform_point3(c)),
        )
    }
}

impl Default for Aabb {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts_corners() {
        let aabb = Aabb::new(Vec3::new(5.0, -1.0, 2.0), Vec3::new(1.0, 3.0, -2.0));
        assert_eq!(aabb.min, Vec3::new(1.0, -1.0, -2.0));
        assert_eq!(aabb.max, Vec3::new(5.0, 3.0, 2.0));
    }

    #[test]
    fn test_empty_box_is_union_identity() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(Aabb::empty().is_empty());
        assert_eq!(Aabb::empty().union(&a), a);
        assert_eq!(Aabb::empty().size(), Vec3::ZERO);
    }

    #[test]
    fn test_from_positions() {
        let aabb = Aabb::from_positions(&[0.0, 0.0, 0.0, 2.0, -1.0, 4.0, 1.0, 1.0, 1.0]);
        assert_eq!(aabb.min, Vec3::new(0.0, -1.0, 0.0));
        assert_eq!(aabb.max, Vec3::new(2.0, 1.0, 4.0));
    }

    #[test]
    fn test_contains_and_intersects() {
        let a = Aabb::new(Vec3::ZERO, Vec3::splat(10.0));
        let inner = Aabb::new(Vec3::splat(2.0), Vec3::splat(3.0));
        let straddling = Aabb::new(Vec3::splat(9.0), Vec3::splat(12.0));
        let outside = Aabb::new(Vec3::splat(11.0), Vec3::splat(12.0));

        assert!(a.contains_point(Vec3::splat(10.0)));
        assert!(a.contains_aabb(&inner));
        assert!(!a.contains_aabb(&straddling));
        assert!(a.intersects(&straddling));
        assert!(!a.intersects(&outside));
    }

    #[test]
    fn test_distance_squared_to_point() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert_eq!(a.distance_squared_to_point(Vec3::splat(0.5)), 0.0);
        assert_eq!(a.distance_squared_to_point(Vec3::new(3.0, 0.5, 0.5)), 4.0);
    }

    #[test]
    fn test_transformed_translates() {
        let a = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let moved = a.transformed(&Mat4::from_translation(Vec3::new(10.0, 0.0, 0.0)));
        assert_eq!(moved.min, Vec3::new(10.0, 0.0, 0.0));
        assert_eq!(moved.max, Vec3::new(11.0, 1.0, 1.0));
    }

    #[test]
    fn test_dimension_is_diagonal() {
        let a = Aabb::new(Vec3::ZERO, Vec3::new(3.0, 4.0, 0.0));
        assert!((a.dimension() - 5.0).abs() < 1e-6);
        assert_eq!(a.max_extent(), 4.0);
    }
}
