//! Size-aware LRU cache of generated template geometry.
//!
//! Entries are keyed by a [`CacheCode`] and stored sealed behind an `Arc`, so
//! a tile being written can hold a template while the cache evicts it. Each
//! access stamps the entry with a monotonically increasing tick; the ordered
//! `by_tick` index makes finding the least-recently-used entry O(log n).

use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::lod::Lod;
use crate::mesh::GeometryBuffers;
use crate::sample::{ModelId, RepresentationId, RepresentationKind};

/// Key of one cached template: which model, builder, detail level and geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheCode {
    pub model: ModelId,
    pub kind: RepresentationKind,
    pub lod: Lod,
    pub geometry: RepresentationId,
}

/// Counters for cache effectiveness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    /// Entries refused because they alone exceed capacity.
    pub rejected: u64,
}

struct CacheEntry {
    buffers: Arc<GeometryBuffers>,
    bytes: usize,
    tick: u64,
}

pub struct TileCache {
    capacity: usize,
    used: usize,
    tick: u64,
    entries: FxHashMap<CacheCode, CacheEntry>,
    by_tick: BTreeMap<u64, CacheCode>,
    stats: CacheStats,
}

impl TileCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: 0,
            tick: 0,
            entries: FxHashMap::default(),
            by_tick: BTreeMap::new(),
            stats: CacheStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sum of the byte sizes of all entries.
    pub fn used_bytes(&self) -> usize {
        self.used
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn contains(&self, code: &CacheCode) -> bool {
        self.entries.contains_key(code)
    }

    /// Look up an entry and mark it most-recently-used.
    pub fn get(&mut self, code: &CacheCode) -> Option<Arc<GeometryBuffers>> {
        self.tick += 1;
        let tick = self.tick;
        let Some(entry) = self.entries.get_mut(code) else {
            self.stats.misses += 1;
            return None;
        };
        self.by_tick.remove(&entry.tick);
        entry.tick = tick;
        self.by_tick.insert(tick, *code);
        self.stats.hits += 1;
        Some(entry.buffers.clone())
    }

    /// Insert (or replace) an entry, evicting least-recently-used entries
    /// until it fits.
    ///
    /// An entry larger than the whole capacity is not stored; the returned
    /// handle is still usable by the caller.
    pub fn add(&mut self, code: CacheCode, buffers: GeometryBuffers) -> Arc<GeometryBuffers> {
        let bytes = buffers.byte_size();
        let buffers = Arc::new(buffers);
        self.remove(&code);

        if bytes > self.capacity {
            self.stats.rejected += 1;
            debug!(?code, bytes, capacity = self.capacity, "template larger than cache, not stored");
            return buffers;
        }

        while self.used + bytes > self.capacity {
            let Some((_, oldest)) = self.by_tick.pop_first() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&oldest) {
                self.used -= evicted.bytes;
                self.stats.evictions += 1;
                trace!(code = ?oldest, bytes = evicted.bytes, "evicted template");
            }
        }

        self.tick += 1;
        self.by_tick.insert(self.tick, code);
        self.entries.insert(
            code,
            CacheEntry {
                buffers: buffers.clone(),
                bytes,
                tick: self.tick,
            },
        );
        self.used += bytes;
        self.stats.insertions += 1;
        buffers
    }

    /// Drop one entry. Returns `true` if it was present.
    pub fn remove(&mut self, code: &CacheCode) -> bool {
        match self.entries.remove(code) {
            Some(entry) => {
                self.by_tick.remove(&entry.tick);
                self.used -= entry.bytes;
                true
            }
            None => false,
        }
    }

    /// Drop every entry belonging to `model`.
    pub fn remove_model(&mut self, model: ModelId) -> usize {
        let codes: Vec<CacheCode> = self
            .entries
            .keys()
            .filter(|code| code.model == model)
            .copied()
            .collect();
        for code in &codes {
            self.remove(code);
        }
        codes.len()
    }

    /// Change capacity. Any change clears the cache.
    pub fn set_capacity(&mut self, capacity: usize) {
        if capacity == self.capacity {
            return;
        }
        debug!(old = self.capacity, new = capacity, "cache capacity changed, clearing");
        self.capacity = capacity;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.by_tick.clear();
        self.used = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::MeshBuffers;

    fn code(geometry: u32) -> CacheCode {
        CacheCode {
            model: ModelId(1),
            kind: RepresentationKind::Shell,
            lod: Lod::Geometry,
            geometry: RepresentationId(geometry),
        }
    }

    /// `floats` f32 positions, so `4 * floats` bytes.
    fn buffers(floats: usize) -> GeometryBuffers {
        GeometryBuffers::Single(MeshBuffers {
            positions: vec![0.0; floats],
            ..Default::default()
        })
    }

    #[test]
    fn test_get_miss_then_hit() {
        let mut cache = TileCache::new(1024);
        assert!(cache.get(&code(1)).is_none());
        cache.add(code(1), buffers(3));
        assert!(cache.get(&code(1)).is_some());
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_lru_evicts_least_recently_used() {
        // Three 40-byte entries in a 100-byte cache.
        let mut cache = TileCache::new(100);
        cache.add(code(1), buffers(10));
        cache.add(code(2), buffers(10));
        assert!(cache.get(&code(1)).is_some());
        cache.add(code(3), buffers(10));
        assert!(cache.contains(&code(1)));
        assert!(!cache.contains(&code(2)));
        assert!(cache.contains(&code(3)));
        assert!(cache.used_bytes() <= cache.capacity());
    }

    #[test]
    fn test_used_never_exceeds_capacity() {
        let mut cache = TileCache::new(200);
        for i in 0..50 {
            cache.add(code(i), buffers(1 + (i as usize * 7) % 30));
            assert!(cache.used_bytes() <= cache.capacity());
        }
    }

    #[test]
    fn test_oversized_entry_is_not_stored() {
        let mut cache = TileCache::new(100);
        cache.add(code(1), buffers(5));
        let handle = cache.add(code(2), buffers(100));
        assert_eq!(handle.byte_size(), 400);
        assert!(!cache.contains(&code(2)));
        assert!(cache.contains(&code(1)));
        assert_eq!(cache.stats().rejected, 1);
    }

    #[test]
    fn test_replacing_entry_updates_size() {
        let mut cache = TileCache::new(1000);
        cache.add(code(1), buffers(10));
        cache.add(code(1), buffers(20));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 80);
    }

    #[test]
    fn test_capacity_change_clears() {
        let mut cache = TileCache::new(1000);
        cache.add(code(1), buffers(10));
        cache.set_capacity(1000);
        assert_eq!(cache.len(), 1);
        cache.set_capacity(2000);
        assert!(cache.is_empty());
        assert_eq!(cache.used_bytes(), 0);
    }

    #[test]
    fn test_remove_model() {
        let mut cache = TileCache::new(1000);
        cache.add(code(1), buffers(1));
        let mut other = code(2);
        other.model = ModelId(9);
        cache.add(other, buffers(1));
        assert_eq!(cache.remove_model(ModelId(1)), 1);
        assert!(cache.contains(&other));
        assert_eq!(cache.used_bytes(), 4);
    }
}
