//! End-to-end tests: sizing pass, view changes, item changes and eviction
//! driven through the public scheduler API.

use std::time::Instant;

use glam::{Mat4, Quat, Vec3};
use tessera_config::Config;
use tessera_math::Aabb;

use super::*;

fn unit_cube() -> ShellTemplate {
    let positions = Aabb::new(Vec3::ZERO, Vec3::ONE)
        .corners()
        .iter()
        .flat_map(|c| c.to_array())
        .collect();
    ShellTemplate {
        positions,
        indices: vec![
            0, 2, 1, 1, 2, 3, 4, 5, 6, 5, 7, 6, 0, 1, 4, 1, 5, 4, 2, 6, 3, 3, 6, 7, 0, 4, 2, 2, 4, 6, 1, 3, 5, 3,
            7, 5,
        ],
    }
}

fn pipe() -> CircleExtrusion {
    CircleExtrusion {
        axis: vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0)],
        radius: 0.001,
    }
}

fn builders() -> MeshBuilders {
    let mut shells = ShellMeshBuilder::new();
    shells.insert(RepresentationId(1), unit_cube()).unwrap();
    let mut pipes = CircleExtrusionMeshBuilder::new();
    pipes.insert(RepresentationId(2), pipe()).unwrap();
    MeshBuilders::new().with(shells).with(pipes)
}

fn placed(id: u32, item: u32, representation: u32, at: Vec3, scale: f32) -> Sample {
    Sample::new(
        SampleId(id),
        ItemId(item),
        RepresentationId(representation),
        MaterialId(0),
        Mat4::from_scale_rotation_translation(Vec3::splat(scale), Quat::IDENTITY, at),
        &Aabb::new(Vec3::ZERO, Vec3::ONE),
    )
}

struct Harness {
    builders: MeshBuilders,
    runtime: WorkerRuntime,
    items: ItemState,
    scheduler: TileScheduler,
}

impl Harness {
    fn new(samples: Vec<Sample>, item_count: usize) -> Self {
        Self::with_config(samples, item_count, &Config::default())
    }

    fn with_config(samples: Vec<Sample>, item_count: usize, config: &Config) -> Self {
        let builders = builders();
        let scheduler = TileScheduler::new(ModelId(3), Mat4::IDENTITY, samples, &builders, config).unwrap();
        Self {
            builders,
            runtime: WorkerRuntime::from_config(&config.cache),
            items: ItemState::new(item_count),
            scheduler,
        }
    }

    fn view(&mut self, view: View) {
        self.scheduler.set_view(view, &mut self.runtime);
    }

    fn tick(&mut self) -> UpdateStats {
        let stats = self
            .scheduler
            .update(&mut self.runtime, &self.builders, &self.items, Instant::now())
            .unwrap();
        self.scheduler.take_requests();
        stats
    }

    /// Tick until FINISH, returning every request emitted on the way.
    fn settle(&mut self) -> Vec<TileRequest> {
        let mut requests = Vec::new();
        for _ in 0..1000 {
            let stats = self
                .scheduler
                .update(&mut self.runtime, &self.builders, &self.items, Instant::now())
                .unwrap();
            requests.extend(self.scheduler.take_requests());
            if stats.finished {
                return requests;
            }
        }
        panic!("model never settled");
    }
}

fn of_kind(requests: &[TileRequest], kind: TileRequestKind) -> Vec<&TileRequest> {
    requests.iter().filter(|r| r.kind() == kind).collect()
}

/// A distant sample is culled by screen size; raising quality and moving
/// closer brings it back.
#[test]
fn test_screen_size_classification_follows_quality_and_distance() {
    // 4 m cube: diagonal ~6.93 m, so screen size is ~6000 / distance px at
    // 1000 px viewport and 60 degree fov.
    let mut harness = Harness::new(vec![placed(0, 0, 1, Vec3::ZERO, 4.0)], 1);

    harness.view(View::looking_at(Vec3::new(2.0, 2.0, 3004.0), Vec3::splat(2.0), 1000.0).with_quality(0.5));
    let requests = harness.settle();
    assert_eq!(harness.scheduler.sample_lod(SampleId(0)), Some(Lod::Invisible));
    assert!(of_kind(&requests, TileRequestKind::Create).is_empty());

    harness.view(View::looking_at(Vec3::new(2.0, 2.0, 1504.0), Vec3::splat(2.0), 1000.0).with_quality(1.0));
    let requests = harness.settle();
    assert_eq!(harness.scheduler.sample_lod(SampleId(0)), Some(Lod::Geometry));
    assert_eq!(of_kind(&requests, TileRequestKind::Create).len(), 1);
}

/// A thin pipe that is long on screen is drawn as wires.
#[test]
fn test_thin_extrusion_uses_wire_tile() {
    let mut harness = Harness::new(vec![placed(0, 0, 2, Vec3::ZERO, 6.0)], 1);
    harness.view(View::looking_at(Vec3::new(20.0, 0.0, 3.0), Vec3::new(0.0, 0.0, 3.0), 1000.0));
    let requests = harness.settle();
    assert_eq!(harness.scheduler.sample_lod(SampleId(0)), Some(Lod::Wires));
    let creates = of_kind(&requests, TileRequestKind::Create);
    assert_eq!(creates.len(), 1);
    let TileRequest::Create(create) = creates[0] else {
        unreachable!()
    };
    assert_eq!(create.object_kind, ObjectKind::Line);
}

/// Hiding an item spread over two tiles empties both; they stay resident
/// under budget and are evicted once memory is over budget.
#[test]
fn test_hidden_item_tiles_evicted_only_over_budget() {
    // Same item, two samples in different spatial cells.
    let mut harness = Harness::new(
        vec![
            placed(0, 0, 1, Vec3::ZERO, 4.0),
            placed(1, 0, 1, Vec3::new(64.0, 0.0, 0.0), 4.0),
        ],
        1,
    );
    let camera = View::looking_at(Vec3::new(34.0, 2.0, 120.0), Vec3::new(34.0, 2.0, 2.0), 1000.0);
    harness.view(camera.clone());
    let requests = harness.settle();
    assert_eq!(of_kind(&requests, TileRequestKind::Create).len(), 2);
    assert_eq!(harness.scheduler.real_tile_count(), 2);
    let resident = harness.runtime.generated_bytes();
    assert!(resident > 0);

    harness.items.set_visible(&[ItemId(0)], false);
    harness.scheduler.invalidate_items();
    let requests = harness.settle();
    let updates = of_kind(&requests, TileRequestKind::Update);
    assert_eq!(updates.len(), 2);
    for update in updates {
        let TileRequest::Update(update) = update else {
            unreachable!()
        };
        assert!(update.visibility.is_empty());
    }
    assert!(of_kind(&requests, TileRequestKind::Delete).is_empty());
    assert_eq!(harness.scheduler.real_tile_count(), 2);
    assert_eq!(harness.runtime.generated_bytes(), resident);

    harness.view(camera.with_memory_threshold(1));
    let requests = harness.settle();
    assert_eq!(of_kind(&requests, TileRequestKind::Delete).len(), 2);
    assert_eq!(harness.scheduler.real_tile_count(), 0);
    assert_eq!(harness.runtime.generated_bytes(), 0);
}

/// Camera moves past the threshold clear the finished flag; small jitter does not.
#[test]
fn test_camera_reset_restarts_settle() {
    let mut harness = Harness::new(vec![placed(0, 0, 1, Vec3::ZERO, 4.0)], 1);
    let base = View::looking_at(Vec3::new(2.0, 2.0, 40.0), Vec3::splat(2.0), 1000.0);
    harness.view(base.clone());
    harness.settle();
    assert!(harness.scheduler.is_finished());

    let mut jitter = base.clone();
    jitter.camera_position += Vec3::new(0.1, 0.0, 0.0);
    harness.view(jitter);
    assert!(harness.scheduler.is_finished());

    harness.view(View::looking_at(Vec3::new(2.0, 2.0, 60.0), Vec3::splat(2.0), 1000.0));
    assert!(!harness.scheduler.is_finished());
    let requests = harness.settle();
    assert_eq!(of_kind(&requests, TileRequestKind::Finish).len(), 1);
}

/// Many samples in one bucket spill into suffixed tiles that respect the
/// element limit.
#[test]
fn test_bucket_overflow_opens_new_tiles() {
    // 36 indices per cube, so ~1820 cubes fill one tile.
    let samples: Vec<Sample> = (0..4000)
        .map(|i| placed(i, i, 1, Vec3::new((i % 20) as f32, (i / 20 % 20) as f32, (i / 400) as f32), 1.0))
        .collect();
    let harness = Harness::new(samples, 4000);
    let geometry: Vec<&Tile> = harness
        .scheduler
        .tiles()
        .filter(|t| t.lod == Lod::Geometry)
        .collect();
    assert!(geometry.len() >= 3);
    let mut suffixes: Vec<u32> = geometry.iter().map(|t| t.suffix).collect();
    suffixes.sort_unstable();
    suffixes.dedup();
    assert_eq!(suffixes.len(), geometry.len());
    for tile in &geometry {
        assert!(tile.vertex_count() as usize <= TILE_ELEMENT_LIMIT);
        assert!(tile.index_count() as usize <= TILE_ELEMENT_LIMIT);
    }
}

/// Highlighted wires are hidden rather than drawn.
#[test]
fn test_highlighted_thin_pipe_hidden() {
    let mut harness = Harness::new(vec![placed(0, 0, 2, Vec3::ZERO, 6.0)], 1);
    harness.items.set_highlight(&[ItemId(0)], 2, false);
    harness.view(View::looking_at(Vec3::new(20.0, 0.0, 3.0), Vec3::new(0.0, 0.0, 3.0), 1000.0));
    harness.settle();
    assert_eq!(harness.scheduler.sample_lod(SampleId(0)), Some(Lod::Invisible));
}

/// Without a view threshold the cache keeps its configured capacity.
#[test]
fn test_default_view_keeps_configured_cache_capacity() {
    let mut harness = Harness::new(vec![placed(0, 0, 1, Vec3::ZERO, 4.0)], 1);
    let configured = Config::default().cache.capacity_bytes();
    assert_eq!(harness.runtime.cache.capacity(), configured);

    let camera = View::looking_at(Vec3::new(2.0, 2.0, 30.0), Vec3::splat(2.0), 1000.0);
    harness.view(camera.clone());
    assert_eq!(harness.runtime.cache.capacity(), configured);
    harness.settle();
    assert!(harness.runtime.cache.used_bytes() > 0);

    harness.view(camera.clone().with_memory_threshold(1 << 20));
    assert_eq!(harness.runtime.cache.capacity(), 1 << 20);

    harness.view(camera);
    assert_eq!(harness.runtime.cache.capacity(), configured);
}

/// An item change arriving mid-sweep is only settled after every sample,
/// including those before the cursor, has been revisited.
#[test]
fn test_item_change_mid_sweep_settles_after_full_pass() {
    let mut config = Config::default();
    config.scheduler.samples_per_tick = 1;
    let samples = (0..4)
        .map(|i| placed(i, i, 1, Vec3::new(i as f32 * 5.0, 0.0, 0.0), 4.0))
        .collect();
    let mut harness = Harness::with_config(samples, 4, &config);
    harness.view(View::looking_at(Vec3::new(8.0, 2.0, 40.0), Vec3::new(8.0, 2.0, 0.0), 1000.0));
    harness.settle();
    assert_ne!(harness.scheduler.sample_lod(SampleId(0)), Some(Lod::Invisible));

    // Move the cursor past the first sample.
    assert!(!harness.tick().finished);

    harness.items.set_visible(&[ItemId(0)], false);
    harness.scheduler.invalidate_items();
    let requests = harness.settle();
    assert_eq!(harness.scheduler.sample_lod(SampleId(0)), Some(Lod::Invisible));
    assert_eq!(of_kind(&requests, TileRequestKind::Finish).len(), 1);
    assert!(matches!(requests.last(), Some(TileRequest::Finish { .. })));
    assert!(!of_kind(&requests, TileRequestKind::Update).is_empty());
}
