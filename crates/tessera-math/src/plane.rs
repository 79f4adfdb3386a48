use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::Aabb;

/// Where an AABB lies relative to a plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaneSide {
    /// Entirely on the side the normal points to.
    Front,
    /// Entirely behind the plane.
    Back,
    /// Crosses the plane.
    Straddling,
}

/// A plane `normal · p + constant = 0` with a unit normal.
///
/// Points with a positive signed distance are "in front". Clipping planes
/// keep the front half-space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub constant: f32,
}

impl Plane {
    /// Build a plane from a (not necessarily normalized) normal and the constant term.
    pub fn new(normal: Vec3, constant: f32) -> Self {
        let len = normal.length();
        if len > 0.0 {
            Self {
                normal: normal / len,
                constant: constant / len,
            }
        } else {
            Self { normal, constant }
        }
    }

    /// Plane through `point` with the given normal.
    pub fn from_normal_and_point(normal: Vec3, point: Vec3) -> Self {
        let n = normal.normalize_or_zero();
        Self {
            normal: n,
            constant: -n.dot(point),
        }
    }

    /// Plane from a packed `Vec4(a, b, c, d)`.
    pub fn from_vec4(v: Vec4) -> Self {
        Self::new(v.truncate(), v.w)
    }

    pub fn signed_distance(&self, p: Vec3) -> f32 {
        self.normal.dot(p) + self.constant
    }

    /// Classify an AABB with the positive/negative vertex method.
    pub fn classify(&self, aabb: &Aabb) -> PlaneSide {
        let n = self.normal;
        // Corner furthest along the normal, and its opposite.
        let p = Vec3::new(
            if n.x >= 0.0 { aabb.max.x } else { aabb.min.x },
            if n.y >= 0.0 { aabb.max.y } else { aabb.min.y },
            if n.z >= 0.0 { aabb.max.z } else { aabb.min.z },
        );
        let q = Vec3::new(
            if n.x >= 0.0 { aabb.min.x } else { aabb.max.x },
            if n.y >= 0.0 { aabb.min.y } else { aabb.max.y },
            if n.z >= 0.0 { aabb.min.z } else { aabb.max.z },
        );
        if self.signed_distance(p) < 0.0 {
            PlaneSide::Back
        } else if self.signed_distance(q) >= 0.0 {
            PlaneSide::Front
        } else {
            PlaneSide::Straddling
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_distance() {
        let plane = Plane::from_normal_and_point(Vec3::Y, Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(plane.signed_distance(Vec3::new(5.0, 3.0, 1.0)), 1.0);
        assert_eq!(plane.signed_distance(Vec3::ZERO), -2.0);
    }

    #[test]
    fn test_new_normalizes() {
        let plane = Plane::new(Vec3::new(0.0, 0.0, 2.0), 4.0);
        assert_eq!(plane.normal, Vec3::Z);
        assert_eq!(plane.constant, 2.0);
    }

    #[test]
    fn test_classify_aabb() {
        let plane = Plane::from_normal_and_point(Vec3::X, Vec3::ZERO);
        let front = Aabb::new(Vec3::new(1.0, 0.0, 0.0), Vec3::new(2.0, 1.0, 1.0));
        let back = Aabb::new(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(-1.0, 1.0, 1.0));
        let across = Aabb::new(Vec3::new(-1.0, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(plane.classify(&front), PlaneSide::Front);
        assert_eq!(plane.classify(&back), PlaneSide::Back);
        assert_eq!(plane.classify(&across), PlaneSide::Straddling);
    }
}
