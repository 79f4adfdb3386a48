//! Picking and selection over a model's samples.
//!
//! A [`BoxController`] keeps a [`SpatialBoxIndex`] over sample boxes for
//! coarse candidate selection. [`RaycastEngine`] then tests candidates
//! exactly against their generated geometry, with optional edge and vertex
//! snapping, or answers rectangle (frustum) selections straight from the
//! index.

pub mod boxes;
pub mod engine;
pub mod error;
pub mod index;

pub use boxes::BoxController;
pub use engine::{HitKind, RaycastEngine, RaycastHit, RaycastQuery, RaycastScene, SnapTargets};
pub use error::RaycastError;
pub use index::{BoxEntry, Bvh, FrustumMatch, SpatialBoxIndex};
