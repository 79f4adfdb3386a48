//! Geometry primitives shared by the tiling, raycasting and dispatch crates:
//! axis-aligned boxes, planes, view frustums and rays in model-local f32 space.

mod aabb;
mod frustum;
mod plane;
mod ray;

pub use aabb::Aabb;
pub use frustum::Frustum;
pub use plane::{Plane, PlaneSide};
pub use ray::{Ray, SegmentHit};

pub use glam::{Mat4, Vec3, Vec4};
