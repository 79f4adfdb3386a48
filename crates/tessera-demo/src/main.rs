//! Headless streaming demo: hosts a grid of boxes on the worker pool,
//! streams it for a fixed camera, then picks, hides and deletes.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p tessera-demo -- --threads 2 --log-level debug`.

use std::time::{Duration, Instant};

use clap::Parser;
use glam::{Mat4, Vec3};
use tessera_config::{CliArgs, Config, default_config_dir};
use tessera_dispatch::{DispatchError, Dispatcher, Reply};
use tessera_math::{Aabb, Ray};
use tessera_raycast::RaycastQuery;
use tessera_tiles::{
    ItemId, MaterialId, MeshBuilders, ModelId, RepresentationId, Sample, SampleId, ShellMeshBuilder, ShellTemplate,
    View,
};
use tracing::{error, info};

const GRID: u32 = 24;
const MODEL: ModelId = ModelId(1);
const REPLY_TIMEOUT: Duration = Duration::from_secs(10);

fn box_template() -> ShellTemplate {
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

/// One sample per grid cell, one item per row, alternating materials.
fn grid_samples() -> Vec<Sample> {
    let bounds = Aabb::new(Vec3::ZERO, Vec3::ONE);
    (0..GRID * GRID)
        .map(|i| {
            let (x, z) = (i % GRID, i / GRID);
            let height = 1.0 + (x * 7 + z * 3) as f32 % 5.0;
            let transform = Mat4::from_scale_rotation_translation(
                Vec3::new(0.8, height, 0.8),
                glam::Quat::IDENTITY,
                Vec3::new(x as f32 * 2.0, 0.0, z as f32 * 2.0),
            );
            Sample::new(
                SampleId(i),
                ItemId(z),
                RepresentationId(1),
                MaterialId(x % 2),
                transform,
                &bounds,
            )
        })
        .collect()
}

fn settle(dispatcher: &mut Dispatcher, finishes: u64) -> Result<(), DispatchError> {
    let deadline = Instant::now() + REPLY_TIMEOUT;
    loop {
        dispatcher.poll();
        if dispatcher
            .render_tiles(MODEL)
            .is_some_and(|tiles| tiles.finish_count() >= finishes)
        {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(DispatchError::Timeout(REPLY_TIMEOUT));
        }
        std::thread::sleep(Duration::from_millis(4));
    }
}

fn report(dispatcher: &Dispatcher, label: &str) {
    if let Some(tiles) = dispatcher.render_tiles(MODEL) {
        let visible: usize = tiles
            .tiles()
            .map(|t| t.visibility.iter().map(|r| r.count as usize).sum::<usize>())
            .sum();
        info!(
            tiles = tiles.len(),
            bytes = tiles.byte_size(),
            visible_indices = visible,
            materials = dispatcher.materials(MODEL).len(),
            "{label}"
        );
    }
}

fn run(config: &Config) -> Result<(), DispatchError> {
    let mut dispatcher = Dispatcher::new(config)?;

    let mut shells = ShellMeshBuilder::new();
    shells.insert(RepresentationId(1), box_template())?;
    let builders = MeshBuilders::new().with(shells);

    let created = dispatcher.create_model(MODEL, Mat4::IDENTITY, grid_samples(), GRID as usize, builders)?;
    dispatcher.wait(&created, REPLY_TIMEOUT)?;

    let center = Vec3::new(GRID as f32, 0.0, GRID as f32);
    let view = View::looking_at(center + Vec3::new(-30.0, 40.0, -30.0), center, 1080.0);
    let started = Instant::now();
    dispatcher.refresh_view(MODEL, view)?;
    settle(&mut dispatcher, 1)?;
    info!(elapsed_ms = started.elapsed().as_millis() as u64, "model settled");
    report(&dispatcher, "streamed");

    let ray = Ray::new(center + Vec3::Y * 50.0, Vec3::NEG_Y);
    let pick = dispatcher.raycast(MODEL, RaycastQuery::new(ray))?;
    if let Reply::Hit(Some(hit)) = dispatcher.wait(&pick, REPLY_TIMEOUT)? {
        info!(item = hit.item.0, sample = hit.sample.0, point = ?hit.point, "picked");
        let hide = dispatcher.set_visible(MODEL, vec![hit.item], false)?;
        dispatcher.wait(&hide, REPLY_TIMEOUT)?;
        settle(&mut dispatcher, 2)?;
        report(&dispatcher, "after hiding picked row");
    }

    let usage = dispatcher.memory_usage(MODEL)?;
    if let Reply::Memory(usage) = dispatcher.wait(&usage, REPLY_TIMEOUT)? {
        info!(generated = usage.generated, cache = usage.cache, items = usage.items, "memory");
    }

    let deleted = dispatcher.delete_model(MODEL)?;
    dispatcher.wait(&deleted, REPLY_TIMEOUT)?;
    for (model, message) in dispatcher.take_errors() {
        error!(model = model.map(|m| m.0), %message, "worker reported");
    }
    Ok(())
}

fn main() {
    let args = CliArgs::parse();
    let config_dir = args.config.clone().unwrap_or_else(default_config_dir);
    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("config error, using defaults: {err}");
            Config::default()
        }
    };
    config.apply_cli_overrides(&args);

    tessera_log::init_logging(Some(&config_dir.join("logs")), cfg!(debug_assertions), Some(&config));
    info!(threads = ?config.workers.max_threads, "tessera demo starting");

    if let Err(err) = run(&config) {
        error!(%err, "demo failed");
        std::process::exit(1);
    }
}
