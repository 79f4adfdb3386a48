//! Per-model tile scheduler.
//!
//! At construction every sample segment is assigned to a tile for each drawn
//! LOD (sizing pass only, no geometry). Each tick then reclassifies a slice
//! of samples in largest-first order, flips their slots between tiles, and
//! turns the tiles touched into CREATE / UPDATE / DELETE requests. A full
//! pass that changes nothing emits one FINISH.
//!
//! Tile buffers are generated lazily: a tile is materialized the first time
//! one of its slots becomes visible, and its buffers are dropped again only
//! when it is fully invisible and the worker's generated bytes exceed the
//! view's memory threshold.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use glam::{Mat4, Vec3};
use rustc_hash::FxHashMap;
use tessera_config::{Config, SchedulerConfig};
use tessera_math::Frustum;
use tracing::{debug, trace, warn};

use crate::bucket::BucketKey;
use crate::cache::CacheCode;
use crate::error::TileError;
use crate::item_state::{ItemState, NO_HIGHLIGHT};
use crate::lod::{Lod, LodClassifier, LodInput};
use crate::mesh::{MeshBuilders, SegmentSize, TILE_ELEMENT_LIMIT};
use crate::request::{TileBuffers, TileCreate, TileRequest, TileUpdate};
use crate::runtime::WorkerRuntime;
use crate::sample::{
    ItemId, MaterialId, ModelId, ObjectKind, RepresentationId, Sample, SampleId, TileId,
};
use crate::tile::Tile;
use crate::view::View;

/// Counters for one [`TileScheduler::update`] call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdateStats {
    pub processed: usize,
    pub changed: usize,
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub finished: bool,
}

/// Incremental geometry change: samples added or replaced, samples removed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryEdit {
    pub upserted: Vec<Sample>,
    pub removed: Vec<SampleId>,
}

#[derive(Clone, Copy, Debug)]
struct Placement {
    tile: TileId,
    slot: u32,
    lod: Lod,
}

#[derive(Debug)]
struct SampleRecord {
    sample: Sample,
    /// Model-space LOD proxy thickness.
    thickness: Option<f32>,
    lod: Lod,
    highlight: u16,
    placements: Vec<Placement>,
    alive: bool,
}

impl SampleRecord {
    fn new(sample: Sample) -> Self {
        Self {
            sample,
            thickness: None,
            lod: Lod::Invisible,
            highlight: NO_HIGHLIGHT,
            placements: Vec::new(),
            alive: true,
        }
    }
}

fn object_kind_for(lod: Lod) -> ObjectKind {
    match lod {
        Lod::Wires => ObjectKind::Line,
        _ => ObjectKind::Shell,
    }
}

pub struct TileScheduler {
    model: ModelId,
    transform: Mat4,
    config: SchedulerConfig,
    classifier: LodClassifier,
    records: Vec<SampleRecord>,
    index: FxHashMap<SampleId, usize>,
    /// Record indices, largest sample first.
    order: Vec<usize>,
    cursor: usize,
    tiles: BTreeMap<TileId, Tile>,
    /// Bucket code to the tile currently accepting segments.
    open: FxHashMap<u64, TileId>,
    suffixes: FxHashMap<u64, u32>,
    next_tile: u32,
    view: Option<View>,
    frustum: Option<Frustum>,
    /// Camera position and direction at the last reset.
    anchor: Option<(Vec3, Vec3)>,
    finished: bool,
    /// Samples visited in a row with no change since the last change,
    /// item invalidation, view or edit. Settled once it covers the order.
    clean_streak: usize,
    dirty: BTreeSet<TileId>,
    pending: Vec<TileRequest>,
}

impl TileScheduler {
    /// Run the sizing pass for `samples`.
    ///
    /// Samples whose representation no builder supports are kept out of
    /// every tile and logged.
    pub fn new(
        model: ModelId,
        transform: Mat4,
        samples: Vec<Sample>,
        builders: &MeshBuilders,
        config: &Config,
    ) -> Result<Self, TileError> {
        let mut scheduler = Self {
            model,
            transform,
            config: config.scheduler.clone(),
            classifier: LodClassifier::new(config.lod.clone()),
            records: Vec::with_capacity(samples.len()),
            index: FxHashMap::default(),
            order: Vec::new(),
            cursor: 0,
            tiles: BTreeMap::new(),
            open: FxHashMap::default(),
            suffixes: FxHashMap::default(),
            next_tile: 0,
            view: None,
            frustum: None,
            anchor: None,
            finished: false,
            clean_streak: 0,
            dirty: BTreeSet::new(),
            pending: Vec::new(),
        };
        for sample in samples {
            let index = scheduler.records.len();
            scheduler.index.insert(sample.id, index);
            scheduler.records.push(SampleRecord::new(sample));
            scheduler.place_or_skip(index, builders)?;
        }
        scheduler.rebuild_order();
        debug!(
            model = model.0,
            samples = scheduler.records.len(),
            tiles = scheduler.tiles.len(),
            "tiling pass complete"
        );
        Ok(scheduler)
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn view(&self) -> Option<&View> {
        self.view.as_ref()
    }

    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(&id)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub fn real_tile_count(&self) -> usize {
        self.tiles.values().filter(|t| t.is_real()).count()
    }

    /// Live samples in model order.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.records.iter().filter(|r| r.alive).map(|r| &r.sample)
    }

    pub fn sample(&self, id: SampleId) -> Option<&Sample> {
        self.index.get(&id).map(|&i| &self.records[i].sample)
    }

    /// Current LOD of a sample, as last classified.
    pub fn sample_lod(&self, id: SampleId) -> Option<Lod> {
        self.index.get(&id).map(|&i| self.records[i].lod)
    }

    /// Items owning at least one live sample, ascending.
    pub fn items_with_geometry(&self) -> Vec<ItemId> {
        let items: BTreeSet<ItemId> = self.samples().map(|s| s.item).collect();
        items.into_iter().collect()
    }

    /// Bytes held by this model's materialized tiles.
    pub fn generated_bytes(&self) -> usize {
        self.tiles.values().map(Tile::byte_size).sum()
    }

    /// Drain queued tile requests.
    pub fn take_requests(&mut self) -> Vec<TileRequest> {
        std::mem::take(&mut self.pending)
    }

    // --- Sizing pass ---

    fn place_or_skip(&mut self, index: usize, builders: &MeshBuilders) -> Result<(), TileError> {
        match self.place(index, builders) {
            Err(err @ (TileError::UnsupportedRepresentation(_) | TileError::UnsupportedInput(_))) => {
                warn!(
                    model = self.model.0,
                    sample = self.records[index].sample.id.0,
                    %err,
                    "sample skipped"
                );
                Ok(())
            }
            other => other,
        }
    }

    fn place(&mut self, index: usize, builders: &MeshBuilders) -> Result<(), TileError> {
        let sample = self.records[index].sample.clone();
        let builder = builders.builder_for(sample.representation)?;
        let center = sample.bbox.center();
        let dimension = sample.bbox.dimension();
        let mut placements = Vec::new();
        let mut thickness = None;

        for lod in Lod::DRAWN {
            let size = builder.size_template(sample.representation, lod)?;
            if lod == Lod::Geometry {
                thickness = size.lod_thickness.map(|t| t * sample.scale_factor());
            }
            let object_kind = object_kind_for(lod);
            let code = BucketKey::new(
                object_kind,
                sample.material,
                lod,
                center,
                dimension,
                self.config.cell_size,
            )
            .code();
            for (segment, segment_size) in size.segments.iter().enumerate() {
                if segment_size.vertex_count as usize > TILE_ELEMENT_LIMIT
                    || segment_size.index_count as usize > TILE_ELEMENT_LIMIT
                {
                    warn!(
                        sample = sample.id.0,
                        segment, "template segment exceeds tile limits, dropped"
                    );
                    continue;
                }
                let tile_id = self.open_tile(code, object_kind, sample.material, lod, segment_size);
                let tile = self
                    .tiles
                    .get_mut(&tile_id)
                    .ok_or(TileError::UnknownTile(tile_id))?;
                let slot = tile.append(&sample, segment as u16, *segment_size)?;
                placements.push(Placement {
                    tile: tile_id,
                    slot,
                    lod,
                });
            }
        }

        let record = &mut self.records[index];
        record.placements = placements;
        record.thickness = thickness;
        Ok(())
    }

    /// The tile accepting segments for `code`, opening a new one (next
    /// suffix) when the current one is full or already materialized.
    fn open_tile(
        &mut self,
        code: u64,
        object_kind: ObjectKind,
        material: MaterialId,
        lod: Lod,
        size: &SegmentSize,
    ) -> TileId {
        if let Some(&id) = self.open.get(&code)
            && let Some(tile) = self.tiles.get(&id)
            && !tile.is_real()
            && tile.fits(size)
        {
            return id;
        }
        let suffix = *self
            .suffixes
            .entry(code)
            .and_modify(|s| *s += 1)
            .or_insert(0);
        let id = TileId(self.next_tile);
        self.next_tile += 1;
        self.tiles
            .insert(id, Tile::new(id, code, suffix, object_kind, material, lod));
        self.open.insert(code, id);
        trace!(tile = id.0, code, suffix, "opened tile");
        id
    }

    fn rebuild_order(&mut self) {
        let mut order: Vec<usize> = (0..self.records.len())
            .filter(|&i| self.records[i].alive)
            .collect();
        order.sort_by(|&a, &b| {
            let (a, b) = (&self.records[a].sample, &self.records[b].sample);
            b.bbox
                .dimension()
                .total_cmp(&a.bbox.dimension())
                .then(a.id.cmp(&b.id))
        });
        self.order = order;
        self.cursor = 0;
        self.clean_streak = 0;
    }

    // --- View and item changes ---

    /// Install a new view.
    ///
    /// Moving or turning the camera past the configured thresholds restarts
    /// the sample sweep from the largest sample and clears the finished flag.
    pub fn set_view(&mut self, view: View, runtime: &mut WorkerRuntime) {
        runtime.apply_memory_threshold(view.memory_threshold);

        let reset = match self.anchor {
            None => true,
            Some((position, direction)) => {
                position.distance_squared(view.camera_position) > self.config.camera_move_threshold_sq
                    || direction.angle_between(view.camera_direction) > self.config.camera_angle_threshold_rad
            }
        };
        let settings_changed = self.view.as_ref().is_none_or(|old| {
            old.quality != view.quality
                || old.memory_threshold != view.memory_threshold
                || old.viewport_height != view.viewport_height
                || old.clip_planes != view.clip_planes
                || old.projection != view.projection
        });

        if reset {
            trace!(model = self.model.0, "camera reset");
            self.cursor = 0;
            self.anchor = Some((view.camera_position, view.camera_direction));
        }
        if reset || settings_changed {
            self.finished = false;
        }
        self.clean_streak = 0;
        self.frustum = Some(view.frustum());
        self.view = Some(view);
    }

    /// Item visibility or highlights changed; the next clean pass settles again.
    pub fn invalidate_items(&mut self) {
        self.finished = false;
        self.clean_streak = 0;
    }

    // --- Tick ---

    /// Reclassify up to `samples_per_tick` samples or until the frame budget
    /// measured from `started` runs out, then emit requests for touched tiles.
    pub fn update(
        &mut self,
        runtime: &mut WorkerRuntime,
        builders: &MeshBuilders,
        items: &ItemState,
        started: Instant,
    ) -> Result<UpdateStats, TileError> {
        let mut stats = UpdateStats::default();
        let (Some(view), Some(frustum)) = (self.view.clone(), self.frustum.clone()) else {
            return Ok(stats);
        };

        let mut settled = self.order.is_empty() && !self.finished;
        let budget = self.config.frame_budget();
        while !self.order.is_empty() && !settled {
            let index = self.order[self.cursor];
            if self.refresh(index, &view, &frustum, items)? {
                stats.changed += 1;
                self.clean_streak = 0;
                self.finished = false;
            } else {
                self.clean_streak += 1;
            }
            stats.processed += 1;
            self.cursor += 1;
            if self.cursor >= self.order.len() {
                self.cursor = 0;
                if self.finished {
                    break;
                }
            }
            if !self.finished && self.clean_streak >= self.order.len() {
                settled = true;
                break;
            }
            if stats.processed >= self.config.samples_per_tick || started.elapsed() >= budget {
                break;
            }
        }

        self.flush_dirty(runtime, builders, &view, &mut stats)?;
        self.evict(runtime, &view, &mut stats)?;

        if settled {
            self.finished = true;
            stats.finished = true;
            self.pending.push(TileRequest::Finish { model: self.model });
            debug!(model = self.model.0, "model settled");
        }
        Ok(stats)
    }

    fn refresh(&mut self, index: usize, view: &View, frustum: &Frustum, items: &ItemState) -> Result<bool, TileError> {
        let record = &mut self.records[index];
        if !record.alive {
            return Ok(false);
        }
        let highlight = items.highlight(record.sample.item);
        let lod = self.classifier.classify(
            view,
            frustum,
            LodInput {
                bbox: &record.sample.bbox,
                item_visible: items.is_visible(record.sample.item),
                highlighted: highlight != NO_HIGHLIGHT,
                thickness: record.thickness,
            },
        );
        let highlight = if lod == Lod::Invisible { NO_HIGHLIGHT } else { highlight };
        if lod == record.lod && highlight == record.highlight {
            return Ok(false);
        }

        for placement in &record.placements {
            let visible = placement.lod == lod;
            if !visible && placement.lod != record.lod {
                continue;
            }
            let tile = self
                .tiles
                .get_mut(&placement.tile)
                .ok_or(TileError::UnknownTile(placement.tile))?;
            if tile.set_slot_state(placement.slot, visible, highlight)? {
                self.dirty.insert(placement.tile);
            }
        }
        record.lod = lod;
        record.highlight = highlight;
        Ok(true)
    }

    fn flush_dirty(
        &mut self,
        runtime: &mut WorkerRuntime,
        builders: &MeshBuilders,
        view: &View,
        stats: &mut UpdateStats,
    ) -> Result<(), TileError> {
        for id in std::mem::take(&mut self.dirty) {
            let Some(tile) = self.tiles.get(&id) else {
                continue;
            };
            let empty = tile.is_fully_invisible()?;
            if tile.is_real() {
                if empty && over_threshold(runtime, view) {
                    self.release_tile(id, runtime);
                    stats.deleted += 1;
                } else {
                    let update = TileUpdate {
                        model: self.model,
                        tile: id,
                        visibility: tile.visibility_ranges()?,
                        highlights: tile.highlight_ranges()?,
                    };
                    self.pending.push(TileRequest::Update(update));
                    stats.updated += 1;
                }
            } else if !empty {
                let create = self.materialize(id, runtime, builders)?;
                self.pending.push(TileRequest::Create(Box::new(create)));
                stats.created += 1;
            }
        }
        Ok(())
    }

    fn materialize(
        &mut self,
        id: TileId,
        runtime: &mut WorkerRuntime,
        builders: &MeshBuilders,
    ) -> Result<TileCreate, TileError> {
        let tile = self.tiles.get_mut(&id).ok_or(TileError::UnknownTile(id))?;
        let mut buffers = tile.allocate();
        write_slots(tile, &mut buffers, self.model, &self.records, &self.index, runtime, builders)?;
        tile.mark_real(&buffers);
        runtime.add_generated(tile.byte_size());
        trace!(tile = id.0, bytes = tile.byte_size(), "materialized tile");
        Ok(TileCreate {
            model: self.model,
            tile: id,
            object_kind: tile.object_kind,
            material: tile.material,
            lod: tile.lod,
            buffers,
            transform: self.transform,
            bbox: tile.bbox(),
            visibility: tile.visibility_ranges()?,
            highlights: tile.highlight_ranges()?,
        })
    }

    fn release_tile(&mut self, id: TileId, runtime: &mut WorkerRuntime) {
        if let Some(tile) = self.tiles.get_mut(&id) {
            let bytes = tile.release();
            runtime.release_generated(bytes);
            self.pending.push(TileRequest::Delete {
                model: self.model,
                tile: id,
            });
            trace!(tile = id.0, bytes, "released tile");
        }
    }

    /// Drop fully invisible tiles while generated bytes exceed the threshold.
    fn evict(&mut self, runtime: &mut WorkerRuntime, view: &View, stats: &mut UpdateStats) -> Result<(), TileError> {
        if !over_threshold(runtime, view) {
            return Ok(());
        }
        let mut candidates = Vec::new();
        for (id, tile) in &self.tiles {
            if tile.is_real() && tile.is_fully_invisible()? {
                candidates.push(*id);
            }
        }
        for id in candidates {
            if !over_threshold(runtime, view) {
                break;
            }
            self.release_tile(id, runtime);
            stats.deleted += 1;
        }
        Ok(())
    }

    // --- Edits and disposal ---

    /// Apply an incremental geometry change.
    ///
    /// Affected slots are retired rather than compacted; tiles left with only
    /// retired slots are deleted. Replaced samples are re-tiled into open
    /// tiles and reclassified on the next pass.
    pub fn apply_edit(
        &mut self,
        edit: GeometryEdit,
        builders: &MeshBuilders,
        runtime: &mut WorkerRuntime,
    ) -> Result<(), TileError> {
        let mut touched = BTreeSet::new();

        for id in &edit.removed {
            let Some(index) = self.index.remove(id) else {
                warn!(model = self.model.0, sample = id.0, "removing unknown sample");
                continue;
            };
            self.retire(index, &mut touched)?;
            self.records[index].alive = false;
        }

        for sample in &edit.upserted {
            if let Some(&index) = self.index.get(&sample.id) {
                let old = self.records[index].sample.representation;
                self.invalidate_templates(old, builders, runtime);
                self.retire(index, &mut touched)?;
            }
            self.invalidate_templates(sample.representation, builders, runtime);
        }

        for sample in edit.upserted {
            let index = match self.index.get(&sample.id) {
                Some(&index) => {
                    self.records[index] = SampleRecord::new(sample);
                    index
                }
                None => {
                    let index = self.records.len();
                    self.index.insert(sample.id, index);
                    self.records.push(SampleRecord::new(sample));
                    index
                }
            };
            self.place_or_skip(index, builders)?;
        }

        for id in touched {
            let Some(tile) = self.tiles.get(&id) else {
                continue;
            };
            if tile.is_retired() {
                if tile.is_real() {
                    self.release_tile(id, runtime);
                }
                self.tiles.remove(&id);
                self.open.retain(|_, open| *open != id);
            } else if tile.is_real() {
                self.dirty.insert(id);
            }
        }

        self.rebuild_order();
        self.finished = false;
        Ok(())
    }

    fn retire(&mut self, index: usize, touched: &mut BTreeSet<TileId>) -> Result<(), TileError> {
        let record = &mut self.records[index];
        for placement in record.placements.drain(..) {
            if let Some(tile) = self.tiles.get_mut(&placement.tile) {
                tile.retire_slot(placement.slot)?;
                touched.insert(placement.tile);
            }
        }
        record.lod = Lod::Invisible;
        record.highlight = NO_HIGHLIGHT;
        Ok(())
    }

    fn invalidate_templates(
        &self,
        representation: RepresentationId,
        builders: &MeshBuilders,
        runtime: &mut WorkerRuntime,
    ) {
        let Ok(kind) = builders.kind_of(representation) else {
            return;
        };
        for lod in Lod::DRAWN {
            runtime.cache.remove(&CacheCode {
                model: self.model,
                kind,
                lod,
                geometry: representation,
            });
        }
    }

    /// Release every materialized tile and this model's cached templates.
    pub fn dispose(&mut self, runtime: &mut WorkerRuntime) {
        let released: usize = self.tiles.values_mut().map(Tile::release).sum();
        runtime.release_generated(released);
        runtime.cache.remove_model(self.model);
        self.tiles.clear();
        self.open.clear();
        self.dirty.clear();
        self.pending.clear();
        debug!(model = self.model.0, released, "model disposed");
    }
}

/// Generated bytes exceed the view's threshold. No threshold never evicts.
fn over_threshold(runtime: &WorkerRuntime, view: &View) -> bool {
    view.memory_threshold
        .is_some_and(|threshold| runtime.generated_bytes() > threshold)
}

/// Fill an allocated tile with the templates of its live slots.
fn write_slots(
    tile: &Tile,
    buffers: &mut TileBuffers,
    model: ModelId,
    records: &[SampleRecord],
    index: &FxHashMap<SampleId, usize>,
    runtime: &mut WorkerRuntime,
    builders: &MeshBuilders,
) -> Result<(), TileError> {
    for (slot_index, slot) in tile.slots().iter().enumerate() {
        if slot.retired {
            continue;
        }
        let record = index
            .get(&slot.sample)
            .map(|&i| &records[i])
            .ok_or(TileError::UnknownSample(slot.sample))?;
        let representation = record.sample.representation;
        let code = CacheCode {
            model,
            kind: builders.kind_of(representation)?,
            lod: tile.lod,
            geometry: representation,
        };
        let geometry = runtime.fetch(code, builders)?;
        let segment = geometry
            .segments()
            .get(slot.segment as usize)
            .ok_or(TileError::MissingBuffers(tile.id))?;
        tile.write_slot(buffers, slot_index as u32, segment, &record.sample.transform)?;
    }
    Ok(())
}
