//! Camera snapshot shipped from the controlling thread on every view refresh.

use glam::{Mat4, Vec3};
use serde::{Deserialize, Serialize};
use tessera_math::{Frustum, Plane};

/// How the camera projects; determines the world-to-screen scale.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    Perspective { fov_y: f32 },
    /// `height` is the visible world height of the orthographic volume.
    Orthographic { height: f32 },
}

/// View payload: camera, frustum source, viewport, memory limit and quality.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct View {
    pub camera_position: Vec3,
    /// Unit viewing direction.
    pub camera_direction: Vec3,
    pub view_projection: Mat4,
    pub projection: Projection,
    /// Viewport height in pixels.
    pub viewport_height: f32,
    /// Generated-bytes level above which invisible tiles are evicted. When
    /// set it also replaces the worker's configured cache capacity.
    pub memory_threshold: Option<usize>,
    /// Render quality in `[0, 1]`.
    pub quality: f32,
    pub clip_planes: Vec<Plane>,
}

impl View {
    /// Perspective camera at `eye` looking at `target` with a 60 degree
    /// vertical field of view.
    pub fn looking_at(eye: Vec3, target: Vec3, viewport_height: f32) -> Self {
        let fov_y = 60f32.to_radians();
        let view = Mat4::look_at_rh(eye, target, Vec3::Y);
        let projection = Mat4::perspective_rh_gl(fov_y, 16.0 / 9.0, 0.1, 10_000.0);
        Self {
            camera_position: eye,
            camera_direction: (target - eye).normalize_or_zero(),
            view_projection: projection * view,
            projection: Projection::Perspective { fov_y },
            viewport_height,
            memory_threshold: None,
            quality: 0.5,
            clip_planes: Vec::new(),
        }
    }

    pub fn with_quality(mut self, quality: f32) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_memory_threshold(mut self, bytes: usize) -> Self {
        self.memory_threshold = Some(bytes);
        self
    }

    pub fn with_clip_planes(mut self, planes: Vec<Plane>) -> Self {
        self.clip_planes = planes;
        self
    }

    /// Multiplier on screen thresholds: 2 at quality 0, 0.5 at quality 1.
    pub fn quality_factor(&self) -> f32 {
        -1.5 * self.quality.clamp(0.0, 1.0) + 2.0
    }

    /// World height visible across the viewport at `distance`.
    pub fn view_scale(&self, distance: f32) -> f32 {
        match self.projection {
            Projection::Perspective { fov_y } => 2.0 * distance * (fov_y / 2.0).tan(),
            Projection::Orthographic { height } => height,
        }
    }

    /// Projected size in pixels of a length `dimension` at `distance`.
    pub fn screen_size(&self, dimension: f32, distance: f32) -> f32 {
        let scale = self.view_scale(distance);
        if scale <= f32::EPSILON {
            return f32::INFINITY;
        }
        dimension / scale * self.viewport_height
    }

    /// Frustum with the clipping planes appended.
    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(&self.view_projection).with_clip_planes(&self.clip_planes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_factor_range() {
        let view = View::looking_at(Vec3::Z, Vec3::ZERO, 100.0);
        assert_eq!(view.clone().with_quality(0.0).quality_factor(), 2.0);
        assert_eq!(view.clone().with_quality(1.0).quality_factor(), 0.5);
        assert_eq!(view.with_quality(7.0).quality_factor(), 0.5);
    }

    #[test]
    fn test_screen_size_halves_with_double_distance() {
        let view = View::looking_at(Vec3::Z, Vec3::ZERO, 1000.0);
        let near = view.screen_size(1.0, 10.0);
        let far = view.screen_size(1.0, 20.0);
        assert!((near / far - 2.0).abs() < 1e-4);
    }

    #[test]
    fn test_camera_inside_box_is_infinitely_large() {
        let view = View::looking_at(Vec3::Z, Vec3::ZERO, 1000.0);
        assert!(view.screen_size(1.0, 0.0).is_infinite());
    }

    #[test]
    fn test_orthographic_scale_is_constant() {
        let mut view = View::looking_at(Vec3::Z, Vec3::ZERO, 500.0);
        view.projection = Projection::Orthographic { height: 50.0 };
        assert_eq!(view.screen_size(5.0, 1.0), view.screen_size(5.0, 100.0));
        assert_eq!(view.screen_size(5.0, 1.0), 50.0);
    }
}
