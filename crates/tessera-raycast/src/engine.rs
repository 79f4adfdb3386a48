//! Two-phase picking: box index candidates, then exact tests against the
//! full-detail geometry of each candidate sample.
//!
//! Face hits rank by squared camera distance. Edge and vertex snaps rank by
//! `ray_sq * multiplier + camera_sq` and are only kept in front of a plane
//! through the nearest face hit, so geometry hidden behind the picked face
//! never wins a snap.

use std::collections::BTreeMap;
use std::time::Instant;

use glam::Vec3;
use tessera_config::RaycastConfig;
use tessera_math::{Frustum, Plane, Ray};
use tessera_tiles::{
    CacheCode, ItemId, ItemState, Lod, MeshBuilders, SampleId, TileError, TileScheduler, WorkerRuntime,
};
use tracing::{debug, warn};

use crate::boxes::BoxController;
use crate::error::RaycastError;
use crate::index::BoxEntry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HitKind {
    Face,
    Edge,
    Vertex,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RaycastHit {
    pub item: ItemId,
    pub sample: SampleId,
    pub kind: HitKind,
    /// Model-local hit point (snapped for edges and vertices).
    pub point: Vec3,
    /// Unit face normal, for face hits.
    pub normal: Option<Vec3>,
    pub camera_squared_distance: f32,
    /// Squared distance between the ray and the snapped point.
    pub ray_squared_distance: Option<f32>,
}

impl RaycastHit {
    fn score(&self, multiplier: f32) -> f32 {
        match self.ray_squared_distance {
            Some(ray_sq) => ray_sq * multiplier + self.camera_squared_distance,
            None => self.camera_squared_distance,
        }
    }
}

/// Which snap targets a query collects besides faces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SnapTargets {
    pub edges: bool,
    pub vertices: bool,
}

impl SnapTargets {
    pub const NONE: Self = Self {
        edges: false,
        vertices: false,
    };
    pub const ALL: Self = Self {
        edges: true,
        vertices: true,
    };

    pub fn any(&self) -> bool {
        self.edges || self.vertices
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RaycastQuery {
    pub ray: Ray,
    pub snap: SnapTargets,
    /// Hits behind any of these planes are ignored.
    pub clip_planes: Vec<Plane>,
}

impl RaycastQuery {
    pub fn new(ray: Ray) -> Self {
        Self {
            ray,
            snap: SnapTargets::NONE,
            clip_planes: Vec::new(),
        }
    }

    pub fn with_snap(mut self, snap: SnapTargets) -> Self {
        self.snap = snap;
        self
    }

    pub fn with_clip_planes(mut self, planes: Vec<Plane>) -> Self {
        self.clip_planes = planes;
        self
    }

    fn clipped(&self, point: Vec3) -> bool {
        self.clip_planes
            .iter()
            .any(|plane| plane.signed_distance(point) < 0.0)
    }
}

/// Borrowed model state a query runs against.
pub struct RaycastScene<'a> {
    pub boxes: &'a BoxController,
    pub scheduler: &'a TileScheduler,
    pub items: &'a ItemState,
    pub builders: &'a MeshBuilders,
}

pub struct RaycastEngine {
    config: RaycastConfig,
}

impl RaycastEngine {
    pub fn new(config: RaycastConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RaycastConfig {
        &self.config
    }

    /// Nearest hit along `query.ray`, or `None`.
    ///
    /// Candidate collection and exact testing share one wall-clock budget;
    /// when it runs out the best hit found so far is returned.
    pub fn raycast(
        &self,
        scene: &RaycastScene<'_>,
        runtime: &mut WorkerRuntime,
        query: &RaycastQuery,
    ) -> Result<Option<RaycastHit>, RaycastError> {
        let ray = &query.ray;
        if !ray.origin.is_finite() || !ray.direction.is_finite() {
            return Err(RaycastError::InvalidRay("non-finite origin or direction"));
        }
        if ray.direction.length_squared() < 0.5 {
            return Err(RaycastError::InvalidRay("zero direction"));
        }

        let started = Instant::now();
        let budget = self.config.time_budget();

        let mut candidates: Vec<(BoxEntry, f32)> = Vec::new();
        for (entry, t) in scene.boxes.index().query_ray(ray) {
            if started.elapsed() > budget {
                warn!(collected = candidates.len(), "raycast budget spent collecting candidates");
                break;
            }
            if scene.items.is_visible(entry.item) {
                candidates.push((entry, t));
            }
        }
        candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.sample.cmp(&b.0.sample)));

        let snap_distance = self.config.snap_distance;
        let snap_sq = snap_distance * snap_distance;
        let mut face: Option<RaycastHit> = None;
        let mut face_t = f32::INFINITY;
        let mut snaps: Vec<RaycastHit> = Vec::new();
        let mut tested = 0usize;

        for (entry, entry_t) in &candidates {
            if started.elapsed() > budget {
                warn!(tested, total = candidates.len(), "raycast budget spent, returning partial result");
                break;
            }
            let reach = if query.snap.any() { face_t + snap_distance } else { face_t };
            if *entry_t > reach {
                break;
            }
            tested += 1;

            let sample = scene
                .scheduler
                .sample(entry.sample)
                .ok_or(TileError::UnknownSample(entry.sample))?;
            let code = CacheCode {
                model: scene.scheduler.model(),
                kind: scene.builders.kind_of(sample.representation)?,
                lod: Lod::Geometry,
                geometry: sample.representation,
            };
            let geometry = runtime.fetch(code, scene.builders)?;

            let hit = |kind, point: Vec3, normal, ray_squared_distance| RaycastHit {
                item: entry.item,
                sample: entry.sample,
                kind,
                point,
                normal,
                camera_squared_distance: point.distance_squared(ray.origin),
                ray_squared_distance,
            };

            for segment in geometry.segments() {
                let positions: Vec<Vec3> = segment
                    .positions
                    .chunks_exact(3)
                    .map(|c| sample.transform.transform_point3(Vec3::new(c[0], c[1], c[2])))
                    .collect();

                for triangle in segment.indices.chunks_exact(3) {
                    let corner = |i: usize| positions.get(triangle[i] as usize).copied();
                    let (Some(a), Some(b), Some(c)) = (corner(0), corner(1), corner(2)) else {
                        continue;
                    };

                    if let Some(t) = ray.intersect_triangle(a, b, c)
                        && t < face_t
                        && !query.clipped(ray.at(t))
                    {
                        face_t = t;
                        let normal = (b - a).cross(c - a).normalize_or_zero();
                        face = Some(hit(HitKind::Face, ray.at(t), Some(normal), None));
                    }

                    if query.snap.edges {
                        for (p, q) in [(a, b), (b, c), (c, a)] {
                            let closest = ray.closest_to_segment(p, q);
                            if closest.distance_squared <= snap_sq && !query.clipped(closest.point) {
                                snaps.push(hit(HitKind::Edge, closest.point, None, Some(closest.distance_squared)));
                            }
                        }
                    }
                }

                if query.snap.vertices {
                    for p in &positions {
                        let (_, distance_squared) = ray.closest_to_point(*p);
                        if distance_squared <= snap_sq && !query.clipped(*p) {
                            snaps.push(hit(HitKind::Vertex, *p, None, Some(distance_squared)));
                        }
                    }
                }
            }
        }

        if let Some(face) = &face {
            let snap_plane = Plane::from_normal_and_point(-ray.direction, face.point + ray.direction * snap_distance);
            snaps.retain(|s| snap_plane.signed_distance(s.point) >= 0.0);
        }

        let multiplier = self.config.ray_distance_multiplier;
        let best_snap = snaps
            .into_iter()
            .min_by(|a, b| a.score(multiplier).total_cmp(&b.score(multiplier)));

        debug!(
            candidates = candidates.len(),
            tested,
            elapsed_us = started.elapsed().as_micros() as u64,
            "raycast"
        );
        Ok(best_snap.or(face))
    }

    /// Visible items whose boxes meet `frustum`, ascending.
    ///
    /// With `fully_inside` (defaulting to the configured policy) an item is
    /// returned only when every one of its sample boxes is inside.
    pub fn rect_raycast(&self, scene: &RaycastScene<'_>, frustum: &Frustum, fully_inside: Option<bool>) -> Vec<ItemId> {
        let fully_inside = fully_inside.unwrap_or(self.config.rect_fully_inside);
        let mut contained: BTreeMap<ItemId, usize> = BTreeMap::new();
        for found in scene.boxes.index().query_frustum(frustum) {
            if !scene.items.is_visible(found.entry.item) {
                continue;
            }
            let count = contained.entry(found.entry.item).or_default();
            if found.contained {
                *count += 1;
            }
        }
        contained
            .into_iter()
            .filter(|(item, count)| !fully_inside || *count == scene.boxes.sample_count(*item))
            .map(|(item, _)| item)
            .collect()
    }
}
