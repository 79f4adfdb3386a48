use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::Aabb;

/// A half-line with a normalized direction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Closest approach between a ray and a line segment.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SegmentHit {
    /// Parameter along the ray (distance from the origin).
    pub ray_t: f32,
    /// Closest point on the segment.
    pub point: Vec3,
    /// Squared distance between the ray and the segment at closest approach.
    pub distance_squared: f32,
}

impl Ray {
    /// Create a ray; `direction` is normalized here.
    pub fn new(origin: Vec3, direction: Vec3) -> Self {
        Self {
            origin,
            direction: direction.normalize_or_zero(),
        }
    }

    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Slab test. Returns the entry distance (0 if the origin is inside).
    pub fn intersect_aabb(&self, aabb: &Aabb) -> Option<f32> {
        if aabb.is_empty() {
            return None;
        }
        let inv = self.direction.recip();
        let t0 = (aabb.min - self.origin) * inv;
        let t1 = (aabb.max - self.origin) * inv;
        let t_near = nan_safe_max(t0.min(t1));
        let t_far = nan_safe_min(t0.max(t1));
        if t_far < 0.0 || t_near > t_far {
            return None;
        }
        Some(t_near.max(0.0))
    }

    /// Möller-Trumbore ray/triangle test. Both faces count as hits.
    pub fn intersect_triangle(&self, a: Vec3, b: Vec3, c: Vec3) -> Option<f32> {
        const EPS: f32 = 1e-7;
        let e1 = b - a;
        let e2 = c - a;
        let p = self.direction.cross(e2);
        let det = e1.dot(p);
        if det.abs() < EPS {
            return None;
        }
        let inv_det = 1.0 / det;
        let s = self.origin - a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }
        let q = s.cross(e1);
        let v = self.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }
        let t = e2.dot(q) * inv_det;
        (t >= 0.0).then_some(t)
    }

    /// Distance along the ray of the closest approach to `p`, and the squared
    /// distance at that point. Points behind the origin clamp to `t = 0`.
    pub fn closest_to_point(&self, p: Vec3) -> (f32, f32) {
        let t = (p - self.origin).dot(self.direction).max(0.0);
        (t, self.at(t).distance_squared(p))
    }

    /// Closest approach between the ray and segment `[a, b]`.
    pub fn closest_to_segment(&self, a: Vec3, b: Vec3) -> SegmentHit {
        let d1 = self.direction;
        let d2 = b - a;
        let r = self.origin - a;
        let len2 = d2.length_squared();
        if len2 <= f32::EPSILON {
            let (t, dist) = self.closest_to_point(a);
            return SegmentHit {
                ray_t: t,
                point: a,
                distance_squared: dist,
            };
        }
        let b_dot = d1.dot(d2);
        let c = d1.dot(r);
        let f = d2.dot(r);
        // d1 is unit length, so a_coef = 1.
        let denom = len2 - b_dot * b_dot;
        let mut s = if denom.abs() > f32::EPSILON {
            ((b_dot * f - c * len2) / denom).max(0.0)
        } else {
            0.0
        };
        let mut u = (b_dot * s + f) / len2;
        if u < 0.0 {
            u = 0.0;
            s = (-c).max(0.0);
        } else if u > 1.0 {
            u = 1.0;
            s = (b_dot - c).max(0.0);
        }
        let on_ray = self.at(s);
        let on_segment = a + d2 * u;
        SegmentHit {
            ray_t: s,
            point: on_segment,
            distance_squared: on_ray.distance_squared(on_segment),
        }
    }
}

fn nan_safe_max(v: Vec3) -> f32 {
    [v.x, v.y, v.z]
        .into_iter()
        .filter(|x| !x.is_nan())
        .fold(f32::NEG_INFINITY, f32::max)
}

fn nan_safe_min(v: Vec3) -> f32 {
    [v.x, v.y, v.z]
        .into_iter()
        .filter(|x| !x.is_nan())
        .fold(f32::INFINITY, f32::min)
}
