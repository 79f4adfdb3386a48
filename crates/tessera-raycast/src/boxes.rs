//! Per-model owner of the box index and per-item bounds.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;
use tessera_math::Aabb;
use tessera_tiles::{ItemId, Sample};
use tracing::debug;

use crate::index::{Bvh, SpatialBoxIndex};

pub struct BoxController {
    index: Box<dyn SpatialBoxIndex>,
    /// Union of each item's sample boxes, model-local space.
    item_boxes: BTreeMap<ItemId, Aabb>,
    sample_counts: FxHashMap<ItemId, usize>,
}

impl BoxController {
    /// Index `samples` with a [`Bvh`].
    pub fn from_samples<'a>(samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        let samples: Vec<&Sample> = samples.into_iter().collect();
        Self::with_index(Box::new(Bvh::from_samples(samples.iter().copied())), samples)
    }

    /// Wrap an externally built index; `samples` must be the ones it holds.
    pub fn with_index<'a>(index: Box<dyn SpatialBoxIndex>, samples: impl IntoIterator<Item = &'a Sample>) -> Self {
        let mut item_boxes: BTreeMap<ItemId, Aabb> = BTreeMap::new();
        let mut sample_counts: FxHashMap<ItemId, usize> = FxHashMap::default();
        for sample in samples {
            if sample.bbox.is_empty() {
                continue;
            }
            let bounds = item_boxes.entry(sample.item).or_default();
            *bounds = bounds.union(&sample.bbox);
            *sample_counts.entry(sample.item).or_default() += 1;
        }
        debug!(entries = index.len(), items = item_boxes.len(), "box index built");
        Self {
            index,
            item_boxes,
            sample_counts,
        }
    }

    /// Replace everything after a geometry edit.
    pub fn rebuild<'a>(&mut self, samples: impl IntoIterator<Item = &'a Sample>) {
        *self = Self::from_samples(samples);
    }

    pub fn index(&self) -> &dyn SpatialBoxIndex {
        self.index.as_ref()
    }

    /// Number of indexed samples belonging to `item`.
    pub fn sample_count(&self, item: ItemId) -> usize {
        self.sample_counts.get(&item).copied().unwrap_or(0)
    }

    pub fn item_box(&self, item: ItemId) -> Option<Aabb> {
        self.item_boxes.get(&item).copied()
    }

    /// Local-space boxes, not yet transformed by the model transform.
    ///
    /// With `Some(items)` the result is parallel to `items`; items without
    /// geometry get an empty box. With `None` it holds one box per item with
    /// geometry, in ascending item order.
    pub fn fetch_boxes(&self, items: Option<&[ItemId]>) -> Vec<Aabb> {
        match items {
            Some(items) => items
                .iter()
                .map(|item| self.item_box(*item).unwrap_or_default())
                .collect(),
            None => self.item_boxes.values().copied().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{Mat4, Vec3};
    use tessera_tiles::{MaterialId, RepresentationId, SampleId};

    use super::*;

    fn sample(id: u32, item: u32, at: Vec3) -> Sample {
        Sample::new(
            SampleId(id),
            ItemId(item),
            RepresentationId(1),
            MaterialId(0),
            Mat4::from_translation(at),
            &Aabb::new(Vec3::ZERO, Vec3::ONE),
        )
    }

    #[test]
    fn test_fetch_boxes_unions_item_samples() {
        let samples = vec![
            sample(0, 4, Vec3::ZERO),
            sample(1, 4, Vec3::new(5.0, 0.0, 0.0)),
            sample(2, 1, Vec3::new(0.0, 9.0, 0.0)),
        ];
        let boxes = BoxController::from_samples(&samples);
        assert_eq!(boxes.index().len(), 3);
        assert_eq!(boxes.sample_count(ItemId(4)), 2);

        let all = boxes.fetch_boxes(None);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], Aabb::new(Vec3::new(0.0, 9.0, 0.0), Vec3::new(1.0, 10.0, 1.0)));
        assert_eq!(all[1], Aabb::new(Vec3::ZERO, Vec3::new(6.0, 1.0, 1.0)));
    }

    #[test]
    fn test_fetch_boxes_for_listed_items() {
        let samples = vec![sample(0, 2, Vec3::ZERO)];
        let boxes = BoxController::from_samples(&samples);
        let listed = boxes.fetch_boxes(Some(&[ItemId(7), ItemId(2)][..]));
        assert_eq!(listed.len(), 2);
        assert!(listed[0].is_empty());
        assert_eq!(listed[1], Aabb::new(Vec3::ZERO, Vec3::ONE));
    }

    #[test]
    fn test_rebuild_drops_removed_samples() {
        let mut samples = vec![sample(0, 0, Vec3::ZERO), sample(1, 1, Vec3::ONE)];
        let mut boxes = BoxController::from_samples(&samples);
        samples.pop();
        boxes.rebuild(&samples);
        assert_eq!(boxes.index().len(), 1);
        assert!(boxes.item_box(ItemId(1)).is_none());
    }
}
