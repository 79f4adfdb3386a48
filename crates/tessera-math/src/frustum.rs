//! View frustum culling against inward-pointing planes extracted from a
//! view-projection matrix, extended with any number of user clipping planes.

use glam::Mat4;

use crate::{Aabb, Plane, PlaneSide};

const LEFT: usize = 0;
const RIGHT: usize = 1;
const BOTTOM: usize = 2;
const TOP: usize = 3;
const NEAR: usize = 4;
const FAR: usize = 5;

/// A convex volume bounded by inward-facing planes.
///
/// The first six planes come from the projection; clip planes appended with
/// [`with_clip_planes`](Self::with_clip_planes) further restrict the volume.
#[derive(Clone, Debug, PartialEq)]
pub struct Frustum {
    planes: Vec<Plane>,
}

impl Frustum {
    /// Extract frustum planes from a combined view-projection matrix
    /// (Griggs-Hartmann, OpenGL-style `[-1, 1]` clip depth).
    pub fn from_view_projection(vp: &Mat4) -> Self {
        let rows = [vp.row(0), vp.row(1), vp.row(2), vp.row(3)];

        let mut packed = [rows[3]; 6];
        packed[LEFT] = rows[3] + rows[0];
        packed[RIGHT] = rows[3] - rows[0];
        packed[BOTTOM] = rows[3] + rows[1];
        packed[TOP] = rows[3] - rows[1];
        packed[NEAR] = rows[3] + rows[2];
        packed[FAR] = rows[3] - rows[2];

        Self {
            planes: packed.into_iter().map(Plane::from_vec4).collect(),
        }
    }

    /// A frustum made only of the given planes (e.g. a selection rectangle
    /// already expressed as four side planes plus near/far).
    pub fn from_planes(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    /// Append clipping planes; geometry behind any of them is outside.
    pub fn with_clip_planes(mut self, clip: &[Plane]) -> Self {
        self.planes.extend_from_slice(clip);
        self
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Returns true if the AABB is at least partially inside every plane.
    ///
    /// Conservative near frustum corners: may accept some boxes that are
    /// outside, never rejects a visible one.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.classify(aabb) != PlaneSide::Back)
    }

    /// Returns true if the AABB lies entirely inside every plane.
    pub fn contains_aabb(&self, aabb: &Aabb) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.classify(aabb) == PlaneSide::Front)
    }
}
