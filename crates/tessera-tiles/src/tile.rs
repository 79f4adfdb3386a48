//! A render tile: packed geometry of many sample segments sharing material,
//! LOD and primitive kind.
//!
//! Tiles are filled in two passes. During sizing, [`Tile::append`] reserves a
//! slot (vertex and index ranges) per sample segment without touching
//! geometry. Such a tile is *virtual*. When a tile first has a visible slot,
//! [`Tile::allocate`] creates its buffers, [`Tile::write_slot`] copies
//! transformed template segments into place and the buffers move out with
//! the CREATE request. The tile then only remembers their size and is *real*
//! until [`Tile::release`].

use glam::{Mat3, Mat4, Vec3};
use rustc_hash::FxHashMap;
use tessera_math::Aabb;

use crate::error::TileError;
use crate::item_state::NO_HIGHLIGHT;
use crate::lod::Lod;
use crate::mesh::{MeshBuffers, SegmentSize, TILE_ELEMENT_LIMIT};
use crate::request::{DrawRange, HighlightRange, TileBuffers};
use crate::run_length::RunLengthState;
use crate::sample::{ItemId, MaterialId, ObjectKind, Sample, SampleId, TileId};

/// Where one sample segment lives inside a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileSlot {
    pub sample: SampleId,
    pub item: ItemId,
    pub segment: u16,
    pub vertex_offset: u32,
    pub vertex_count: u32,
    pub index_offset: u32,
    pub index_count: u32,
    /// Retired slots belonged to edited or removed samples and stay hidden.
    pub retired: bool,
}

#[derive(Debug)]
pub struct Tile {
    pub id: TileId,
    /// Bucket code of the samples grouped here.
    pub code: u64,
    /// Disambiguates tiles sharing a bucket code after overflow.
    pub suffix: u32,
    pub object_kind: ObjectKind,
    pub material: MaterialId,
    pub lod: Lod,
    slots: Vec<TileSlot>,
    locations: FxHashMap<(SampleId, u16), u32>,
    vertex_count: u32,
    index_count: u32,
    bbox: Aabb,
    visible: Option<RunLengthState<bool>>,
    highlights: Option<RunLengthState<u16>>,
    /// Byte size of the buffers handed out, while the tile is real.
    resident: Option<usize>,
}

impl Tile {
    pub fn new(id: TileId, code: u64, suffix: u32, object_kind: ObjectKind, material: MaterialId, lod: Lod) -> Self {
        Self {
            id,
            code,
            suffix,
            object_kind,
            material,
            lod,
            slots: Vec::new(),
            locations: FxHashMap::default(),
            vertex_count: 0,
            index_count: 0,
            bbox: Aabb::empty(),
            visible: Some(RunLengthState::new(0, false)),
            highlights: Some(RunLengthState::new(0, NO_HIGHLIGHT)),
            resident: None,
        }
    }

    pub fn slots(&self) -> &[TileSlot] {
        &self.slots
    }

    pub fn slot_of(&self, sample: SampleId, segment: u16) -> Option<u32> {
        self.locations.get(&(sample, segment)).copied()
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn bbox(&self) -> Aabb {
        self.bbox
    }

    /// True while generated buffers are out on the controlling side.
    pub fn is_real(&self) -> bool {
        self.resident.is_some()
    }

    pub fn byte_size(&self) -> usize {
        self.resident.unwrap_or(0)
    }

    /// Whether a segment of `size` still fits under the element limits.
    pub fn fits(&self, size: &SegmentSize) -> bool {
        (self.vertex_count + size.vertex_count) as usize <= TILE_ELEMENT_LIMIT
            && (self.index_count + size.index_count) as usize <= TILE_ELEMENT_LIMIT
    }

    /// Sizing pass: reserve a hidden slot for one sample segment.
    pub fn append(&mut self, sample: &Sample, segment: u16, size: SegmentSize) -> Result<u32, TileError> {
        if self.is_real() {
            return Err(TileError::UnsupportedInput(format!(
                "tile {:?} is materialized and cannot grow",
                self.id
            )));
        }
        let slot = self.slots.len() as u32;
        self.slots.push(TileSlot {
            sample: sample.id,
            item: sample.item,
            segment,
            vertex_offset: self.vertex_count,
            vertex_count: size.vertex_count,
            index_offset: self.index_count,
            index_count: size.index_count,
            retired: false,
        });
        self.locations.insert((sample.id, segment), slot);
        self.vertex_count += size.vertex_count;
        self.index_count += size.index_count;
        self.bbox = self.bbox.union(&sample.bbox);
        self.visible_mut()?.push(false);
        self.highlights_mut()?.push(NO_HIGHLIGHT);
        Ok(slot)
    }

    fn visible_mut(&mut self) -> Result<&mut RunLengthState<bool>, TileError> {
        let id = self.id;
        self.visible.as_mut().ok_or(TileError::MalformedTile(id, "visibility"))
    }

    fn highlights_mut(&mut self) -> Result<&mut RunLengthState<u16>, TileError> {
        let id = self.id;
        self.highlights.as_mut().ok_or(TileError::MalformedTile(id, "highlight"))
    }

    fn visible_track(&self) -> Result<&RunLengthState<bool>, TileError> {
        self.visible.as_ref().ok_or(TileError::MalformedTile(self.id, "visibility"))
    }

    fn highlight_track(&self) -> Result<&RunLengthState<u16>, TileError> {
        self.highlights.as_ref().ok_or(TileError::MalformedTile(self.id, "highlight"))
    }

    /// Set a slot's visible flag and highlight. Returns `true` on change.
    pub fn set_slot_state(&mut self, slot: u32, visible: bool, highlight: u16) -> Result<bool, TileError> {
        let Some(entry) = self.slots.get(slot as usize) else {
            return Err(TileError::MalformedTile(self.id, "slot"));
        };
        let (visible, highlight) = if entry.retired {
            (false, NO_HIGHLIGHT)
        } else {
            (visible, if visible { highlight } else { NO_HIGHLIGHT })
        };
        let a = self.visible_mut()?.update(slot, visible);
        let b = self.highlights_mut()?.update(slot, highlight);
        Ok(a || b)
    }

    /// Permanently hide a slot. Returns `true` if it was live.
    pub fn retire_slot(&mut self, slot: u32) -> Result<bool, TileError> {
        self.set_slot_state(slot, false, NO_HIGHLIGHT)?;
        let Some(entry) = self.slots.get_mut(slot as usize) else {
            return Err(TileError::MalformedTile(self.id, "slot"));
        };
        let was_live = !entry.retired;
        entry.retired = true;
        self.locations.remove(&(entry.sample, entry.segment));
        Ok(was_live)
    }

    /// True when every slot is retired.
    pub fn is_retired(&self) -> bool {
        self.slots.iter().all(|slot| slot.retired)
    }

    /// True when no slot is visible or highlighted.
    pub fn is_fully_invisible(&self) -> Result<bool, TileError> {
        Ok(self.visible_track()?.full_of(false) && self.highlight_track()?.full_of(NO_HIGHLIGHT))
    }

    /// Zeroed buffers sized by the sizing pass.
    pub fn allocate(&self) -> TileBuffers {
        TileBuffers::zeroed(self.vertex_count as usize, self.index_count as usize)
    }

    /// Write one template segment into its slot of `buffers`, transformed to
    /// model space.
    pub fn write_slot(
        &self,
        buffers: &mut TileBuffers,
        slot: u32,
        mesh: &MeshBuffers,
        transform: &Mat4,
    ) -> Result<(), TileError> {
        let id = self.id;
        let entry = *self
            .slots
            .get(slot as usize)
            .ok_or(TileError::MalformedTile(id, "slot"))?;
        if buffers.vertex_count() != self.vertex_count as usize
            || buffers.indices.len() != self.index_count as usize
        {
            return Err(TileError::MissingBuffers(id));
        }
        let size = mesh.size();
        if size.vertex_count != entry.vertex_count || size.index_count != entry.index_count {
            return Err(TileError::SlotSizeMismatch {
                tile: id,
                slot,
                expected: entry.vertex_count,
                actual: size.vertex_count,
            });
        }

        let normal_matrix = Mat3::from_mat4(*transform).inverse().transpose();
        let base = entry.vertex_offset as usize;
        for v in 0..entry.vertex_count as usize {
            let src = v * 3;
            let dst = (base + v) * 3;
            let p = Vec3::from_slice(&mesh.positions[src..src + 3]);
            buffers.positions[dst..dst + 3].copy_from_slice(&transform.transform_point3(p).to_array());
            if let Some(n) = mesh.normals.get(src..src + 3) {
                let n = (normal_matrix * Vec3::from_slice(n)).normalize_or_zero();
                buffers.normals[dst..dst + 3].copy_from_slice(&n.to_array());
            }
            buffers.item_ids[base + v] = entry.item.0;
        }
        let index_base = entry.index_offset as usize;
        for (i, &index) in mesh.indices.iter().enumerate() {
            buffers.indices[index_base + i] = (index + entry.vertex_offset) as u16;
        }
        Ok(())
    }

    /// Record that `buffers` were handed out; the tile is now real.
    pub fn mark_real(&mut self, buffers: &TileBuffers) {
        self.resident = Some(buffers.byte_size());
    }

    /// Forget handed-out buffers, returning the tile to virtual. Returns the
    /// bytes released.
    pub fn release(&mut self) -> usize {
        self.resident.take().unwrap_or(0)
    }

    /// Visible slot runs as index-buffer ranges.
    pub fn visibility_ranges(&self) -> Result<Vec<DrawRange>, TileError> {
        Ok(self
            .visible_track()?
            .runs()
            .filter(|run| run.value)
            .filter_map(|run| self.index_range(run.position, run.size))
            .collect())
    }

    /// Highlighted slot runs as index-buffer ranges.
    pub fn highlight_ranges(&self) -> Result<Vec<HighlightRange>, TileError> {
        Ok(self
            .highlight_track()?
            .runs()
            .filter(|run| run.value != NO_HIGHLIGHT)
            .filter_map(|run| {
                self.index_range(run.position, run.size).map(|range| HighlightRange {
                    start: range.start,
                    count: range.count,
                    highlight: u32::from(run.value),
                })
            })
            .collect())
    }

    fn index_range(&self, first: u32, count: u32) -> Option<DrawRange> {
        let start = self.slots.get(first as usize)?;
        let last = self.slots.get((first + count).checked_sub(1)? as usize)?;
        let end = last.index_offset + last.index_count;
        (end > start.index_offset).then(|| DrawRange {
            start: start.index_offset,
            count: end - start.index_offset,
        })
    }

    #[cfg(test)]
    pub(crate) fn strip_tracks(&mut self) {
        self.visible = None;
    }
}
