//! Worker-local shared state: the template cache and the generated-bytes
//! counter. One instance per worker thread, passed by reference to every
//! scheduler that thread owns.

use std::sync::Arc;

use tessera_config::CacheConfig;
use tracing::debug;

use crate::cache::{CacheCode, TileCache};
use crate::error::TileError;
use crate::mesh::{GeometryBuffers, MeshBuilders};

pub struct WorkerRuntime {
    pub cache: TileCache,
    /// Capacity used while the view sets no memory threshold.
    base_capacity: usize,
    generated_bytes: usize,
}

impl WorkerRuntime {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: TileCache::new(cache_capacity),
            base_capacity: cache_capacity,
            generated_bytes: 0,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity_bytes())
    }

    /// Bytes currently held by materialized tiles across all models.
    pub fn generated_bytes(&self) -> usize {
        self.generated_bytes
    }

    pub fn add_generated(&mut self, bytes: usize) {
        self.generated_bytes += bytes;
    }

    pub fn release_generated(&mut self, bytes: usize) {
        self.generated_bytes = self.generated_bytes.saturating_sub(bytes);
    }

    /// Follow the view's memory threshold, falling back to the configured
    /// capacity when it has none. A changed capacity clears the cache.
    pub fn apply_memory_threshold(&mut self, threshold: Option<usize>) {
        let capacity = threshold.unwrap_or(self.base_capacity);
        if self.cache.capacity() != capacity {
            debug!(capacity, ?threshold, "cache capacity follows view");
            self.cache.set_capacity(capacity);
        }
    }

    /// Cached template for `code`, building and caching it on a miss.
    pub fn fetch(&mut self, code: CacheCode, builders: &MeshBuilders) -> Result<Arc<GeometryBuffers>, TileError> {
        if let Some(hit) = self.cache.get(&code) {
            return Ok(hit);
        }
        let buffers = builders
            .builder_for(code.geometry)?
            .build(code.geometry, code.lod)?;
        Ok(self.cache.add(code, buffers))
    }
}
