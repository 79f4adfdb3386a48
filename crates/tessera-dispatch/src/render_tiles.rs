//! Controlling-side mirror of a model's tiles.
//!
//! Tile events are applied idempotently by tile id: a CREATE for a known
//! tile replaces it, an UPDATE or DELETE for an unknown tile is a no-op.

use std::collections::BTreeMap;

use glam::Mat4;
use tessera_math::Aabb;
use tessera_tiles::{
    DrawRange, HighlightRange, Lod, MaterialId, ModelId, ObjectKind, RUN_TO_END, RunLengthState, TileBuffers,
    TileId, TileRequest,
};
use tracing::debug;

use crate::protocol::TileBatch;

#[derive(Clone, Debug, PartialEq)]
pub struct RenderTile {
    pub id: TileId,
    pub object_kind: ObjectKind,
    pub material: MaterialId,
    pub lod: Lod,
    pub buffers: TileBuffers,
    pub transform: Mat4,
    pub bbox: Aabb,
    pub visibility: Vec<DrawRange>,
    pub highlights: Vec<HighlightRange>,
}

/// Index ranges drawn with one material.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DrawGroup {
    /// `None` draws with the tile's own material.
    pub highlight: Option<u32>,
    pub ranges: Vec<DrawRange>,
}

impl RenderTile {
    /// One group per highlight id, plus the visible ranges no highlight covers.
    pub fn draw_groups(&self) -> Vec<DrawGroup> {
        let mut highlighted: BTreeMap<u32, Vec<DrawRange>> = BTreeMap::new();
        for range in &self.highlights {
            highlighted.entry(range.highlight).or_default().push(DrawRange {
                start: range.start,
                count: range.count,
            });
        }

        let mut groups = Vec::with_capacity(highlighted.len() + 1);
        let plain = subtract_highlights(&self.visibility, &self.highlights);
        if !plain.is_empty() {
            groups.push(DrawGroup {
                highlight: None,
                ranges: plain,
            });
        }
        groups.extend(highlighted.into_iter().map(|(highlight, ranges)| DrawGroup {
            highlight: Some(highlight),
            ranges,
        }));
        groups
    }
}

/// Parts of `visible` outside every highlight range.
fn subtract_highlights(visible: &[DrawRange], highlights: &[HighlightRange]) -> Vec<DrawRange> {
    let mut covered: Vec<(u32, u32)> = highlights.iter().map(|h| (h.start, h.count)).collect();
    covered.sort_unstable();
    let (positions, sizes): (Vec<u32>, Vec<u32>) = covered.into_iter().unzip();

    let mut gaps = Vec::new();
    RunLengthState::<bool>::get_complementary(&positions, &sizes, |start, size| {
        let end = if size == RUN_TO_END { u32::MAX } else { start + size };
        gaps.push((start, end));
    });

    let mut out = Vec::new();
    for range in visible {
        for &(gap_start, gap_end) in &gaps {
            let start = range.start.max(gap_start);
            let end = range.end().min(gap_end);
            if end > start {
                out.push(DrawRange {
                    start,
                    count: end - start,
                });
            }
        }
    }
    out
}

#[derive(Debug)]
pub struct RenderTiles {
    model: ModelId,
    tiles: BTreeMap<TileId, RenderTile>,
    finishes: u64,
    settled: bool,
}

impl RenderTiles {
    pub fn new(model: ModelId) -> Self {
        Self {
            model,
            tiles: BTreeMap::new(),
            finishes: 0,
            settled: false,
        }
    }

    pub fn model(&self) -> ModelId {
        self.model
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, tile: TileId) -> Option<&RenderTile> {
        self.tiles.get(&tile)
    }

    pub fn tiles(&self) -> impl Iterator<Item = &RenderTile> {
        self.tiles.values()
    }

    /// No tile event arrived since the last FINISH.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Number of FINISH events received.
    pub fn finish_count(&self) -> u64 {
        self.finishes
    }

    /// Buffer bytes held on this side.
    pub fn byte_size(&self) -> usize {
        self.tiles.values().map(|t| t.buffers.byte_size()).sum()
    }

    pub fn apply_batch(&mut self, batch: TileBatch) {
        for request in batch.requests {
            self.apply(request);
        }
    }

    pub fn apply(&mut self, request: TileRequest) {
        if request.model() != self.model {
            debug!(model = self.model.0, other = request.model().0, "tile event for another model ignored");
            return;
        }
        if !matches!(request, TileRequest::Finish { .. }) {
            self.settled = false;
        }
        match request {
            TileRequest::Create(create) => {
                let create = *create;
                self.tiles.insert(
                    create.tile,
                    RenderTile {
                        id: create.tile,
                        object_kind: create.object_kind,
                        material: create.material,
                        lod: create.lod,
                        buffers: create.buffers,
                        transform: create.transform,
                        bbox: create.bbox,
                        visibility: create.visibility,
                        highlights: create.highlights,
                    },
                );
            }
            TileRequest::Update(update) => match self.tiles.get_mut(&update.tile) {
                Some(tile) => {
                    tile.visibility = update.visibility;
                    tile.highlights = update.highlights;
                }
                None => debug!(model = self.model.0, tile = update.tile.0, "update for unknown tile ignored"),
            },
            TileRequest::Delete { tile, .. } => {
                self.tiles.remove(&tile);
            }
            TileRequest::Finish { .. } => {
                self.finishes += 1;
                self.settled = true;
            }
        }
    }
}
