//! Level-of-detail classification from screen-space size.

use serde::{Deserialize, Serialize};
use tessera_config::LodConfig;
use tessera_math::{Aabb, Frustum};

use crate::view::View;

/// Detail level a sample is drawn at.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum Lod {
    #[default]
    Invisible = 0,
    /// Simplified line geometry.
    Wires = 1,
    /// Full triangle geometry.
    Geometry = 2,
}

impl Lod {
    /// The two levels that own geometry, in tiling order.
    pub const DRAWN: [Lod; 2] = [Lod::Geometry, Lod::Wires];
}

/// Per-sample inputs to [`LodClassifier::classify`].
#[derive(Clone, Copy, Debug)]
pub struct LodInput<'a> {
    pub bbox: &'a Aabb,
    pub item_visible: bool,
    pub highlighted: bool,
    /// Model-space thickness of the sample's LOD proxy, if it has one.
    pub thickness: Option<f32>,
}

/// Screen-size thresholds, scaled per view by the quality factor.
#[derive(Clone, Debug)]
pub struct LodClassifier {
    config: LodConfig,
}

impl LodClassifier {
    pub fn new(config: LodConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LodConfig {
        &self.config
    }

    pub fn classify(&self, view: &View, frustum: &Frustum, input: LodInput<'_>) -> Lod {
        if input.bbox.is_empty() || !frustum.intersects_aabb(input.bbox) || !input.item_visible {
            return Lod::Invisible;
        }

        let distance = input
            .bbox
            .distance_squared_to_point(view.camera_position)
            .sqrt();
        let dimension = input.bbox.dimension();
        let screen = view.screen_size(dimension, distance);
        let factor = view.quality_factor();
        let c = &self.config;

        let by_size = if dimension < c.small_object_size {
            if screen < c.medium_screen * factor {
                Some(Lod::Invisible)
            } else if screen < c.large_screen * factor {
                Some(Lod::Wires)
            } else {
                None
            }
        } else if screen < c.small_screen * factor {
            Some(Lod::Invisible)
        } else if screen < c.medium_screen * factor {
            Some(Lod::Wires)
        } else {
            None
        };

        let lod = by_size.unwrap_or_else(|| match input.thickness {
            Some(thickness) if view.screen_size(thickness, distance) < c.wire_screen * factor => {
                Lod::Wires
            }
            _ => Lod::Geometry,
        });

        // Highlighted samples are never drawn as wires.
        if lod == Lod::Wires && input.highlighted {
            Lod::Invisible
        } else {
            lod
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn classifier() -> LodClassifier {
        LodClassifier::new(LodConfig::default())
    }

    fn view_at(distance: f32, quality: f32) -> View {
        View::looking_at(Vec3::new(0.0, 0.0, distance), Vec3::ZERO, 1000.0).with_quality(quality)
    }

    fn cube(size: f32) -> Aabb {
        Aabb::new(Vec3::splat(-size / 2.0), Vec3::splat(size / 2.0))
    }

    fn input(bbox: &Aabb) -> LodInput<'_> {
        LodInput {
            bbox,
            item_visible: true,
            highlighted: false,
            thickness: None,
        }
    }

    #[test]
    fn test_near_large_object_is_geometry() {
        let view = view_at(20.0, 0.5);
        let bbox = cube(4.0);
        assert_eq!(classifier().classify(&view, &view.frustum(), input(&bbox)), Lod::Geometry);
    }

    #[test]
    fn test_hidden_item_is_invisible() {
        let view = view_at(20.0, 0.5);
        let bbox = cube(4.0);
        let mut hidden = input(&bbox);
        hidden.item_visible = false;
        assert_eq!(classifier().classify(&view, &view.frustum(), hidden), Lod::Invisible);
    }

    #[test]
    fn test_behind_camera_is_invisible() {
        let view = view_at(20.0, 0.5);
        let bbox = Aabb::new(Vec3::new(-1.0, -1.0, 30.0), Vec3::new(1.0, 1.0, 32.0));
        assert_eq!(classifier().classify(&view, &view.frustum(), input(&bbox)), Lod::Invisible);
    }

    #[test]
    fn test_distant_large_object_fades_through_wires() {
        let view = view_at(20.0, 0.5);
        let bbox = cube(4.0);
        let screen = view.screen_size(bbox.dimension(), 20.0 - 2.0);
        let factor = view.quality_factor();
        let c = LodConfig::default();
        // Push the camera out until the box lands between the small and medium thresholds.
        let target = (c.small_screen + c.medium_screen) / 2.0 * factor;
        let distance = 18.0 * screen / target + 2.0;
        let far = view_at(distance, 0.5);
        assert_eq!(classifier().classify(&far, &far.frustum(), input(&bbox)), Lod::Wires);
    }

    #[test]
    fn test_highlighted_wires_become_invisible() {
        let view = view_at(20.0, 0.5);
        let bbox = cube(4.0);
        let mut thin = input(&bbox);
        thin.thickness = Some(0.0001);
        assert_eq!(classifier().classify(&view, &view.frustum(), thin), Lod::Wires);
        thin.highlighted = true;
        assert_eq!(classifier().classify(&view, &view.frustum(), thin), Lod::Invisible);
    }

    #[test]
    fn test_small_close_object_is_wires() {
        let c = LodConfig::default();
        let bbox = cube(1.0);
        let probe = view_at(10.0, 0.5);
        let factor = probe.quality_factor();
        let screen_at_probe = probe.screen_size(bbox.dimension(), 10.0 - 0.5);
        let target = (c.medium_screen + c.large_screen) / 2.0 * factor;
        let distance = 9.5 * screen_at_probe / target + 0.5;
        let view = view_at(distance, 0.5);
        assert_eq!(classifier().classify(&view, &view.frustum(), input(&bbox)), Lod::Wires);
    }
}
