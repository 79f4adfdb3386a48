//! Per-model batching of outgoing tile events.
//!
//! Events are folded by a [`RequestCoalescer`] per model. A model's queue is
//! flushed as one [`TileBatch`] when it grows past the size threshold, and
//! every queue is flushed when the timer interval has elapsed.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;
use tessera_config::BatchingConfig;
use tessera_tiles::{ModelId, TileRequest};
use tracing::trace;

use crate::coalescer::RequestCoalescer;
use crate::protocol::TileBatch;

pub struct RequestBatcher {
    queues: FxHashMap<ModelId, RequestCoalescer>,
    threshold: usize,
    interval: Duration,
    last_flush: Instant,
}

impl RequestBatcher {
    pub fn new(config: &BatchingConfig, now: Instant) -> Self {
        Self {
            queues: FxHashMap::default(),
            threshold: config.flush_threshold,
            interval: config.flush_interval(),
            last_flush: now,
        }
    }

    pub fn pending(&self, model: ModelId) -> usize {
        self.queues.get(&model).map_or(0, RequestCoalescer::len)
    }

    /// Queue `request`; returns the model's batch if it is now over threshold.
    pub fn push(&mut self, request: TileRequest) -> Option<TileBatch> {
        let model = request.model();
        let queue = self.queues.entry(model).or_default();
        queue.push(request);
        if queue.len() > self.threshold {
            trace!(model = model.0, size = queue.len(), "batch over threshold");
            return self.flush(model);
        }
        None
    }

    pub fn flush(&mut self, model: ModelId) -> Option<TileBatch> {
        let requests = self.queues.get_mut(&model)?.take();
        (!requests.is_empty()).then(|| TileBatch::new(model, requests))
    }

    /// Flush every model when the interval has elapsed since the last timed flush.
    pub fn tick(&mut self, now: Instant) -> Vec<TileBatch> {
        if now.duration_since(self.last_flush) < self.interval {
            return Vec::new();
        }
        self.last_flush = now;
        self.flush_all()
    }

    pub fn flush_all(&mut self) -> Vec<TileBatch> {
        let mut models: Vec<ModelId> = self.queues.keys().copied().collect();
        models.sort_unstable();
        models.into_iter().filter_map(|model| self.flush(model)).collect()
    }

    /// Forget a disposed model's queue.
    pub fn discard(&mut self, model: ModelId) -> usize {
        self.queues.remove(&model).map_or(0, |queue| queue.len())
    }
}

#[cfg(test)]
mod tests {
    use tessera_tiles::{TileId, TileRequestKind, TileUpdate};

    use super::*;

    fn update(model: u32, tile: u32) -> TileRequest {
        TileRequest::Update(TileUpdate {
            model: ModelId(model),
            tile: TileId(tile),
            ..TileUpdate::default()
        })
    }

    fn batcher(now: Instant) -> RequestBatcher {
        RequestBatcher::new(&BatchingConfig::default(), now)
    }

    #[test]
    fn test_flushes_past_threshold() {
        let mut batcher = batcher(Instant::now());
        for tile in 0..16 {
            assert!(batcher.push(update(0, tile)).is_none());
        }
        let batch = batcher.push(update(0, 16)).expect("17th event flushes");
        assert_eq!(batch.model, ModelId(0));
        assert_eq!(batch.requests.len(), 17);
        assert_eq!(batcher.pending(ModelId(0)), 0);
    }

    #[test]
    fn test_timer_flushes_all_models() {
        let start = Instant::now();
        let mut batcher = batcher(start);
        batcher.push(update(2, 0));
        batcher.push(update(1, 0));
        batcher.push(TileRequest::Finish { model: ModelId(1) });

        assert!(batcher.tick(start + Duration::from_millis(10)).is_empty());
        let batches = batcher.tick(start + Duration::from_millis(64));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].model, ModelId(1));
        assert_eq!(batches[0].requests[1].kind(), TileRequestKind::Finish);
        assert_eq!(batches[1].model, ModelId(2));
        assert!(batcher.tick(start + Duration::from_millis(200)).is_empty());
    }

    #[test]
    fn test_order_preserved_within_model() {
        let mut batcher = batcher(Instant::now());
        batcher.push(update(0, 3));
        batcher.push(update(0, 1));
        batcher.push(update(0, 2));
        let batch = batcher.flush(ModelId(0)).unwrap();
        let tiles: Vec<Option<TileId>> = batch.requests.iter().map(TileRequest::tile).collect();
        assert_eq!(tiles, vec![Some(TileId(3)), Some(TileId(1)), Some(TileId(2))]);
    }

    #[test]
    fn test_discard_drops_queue() {
        let mut batcher = batcher(Instant::now());
        batcher.push(update(5, 0));
        assert_eq!(batcher.discard(ModelId(5)), 1);
        assert!(batcher.flush_all().is_empty());
    }
}
