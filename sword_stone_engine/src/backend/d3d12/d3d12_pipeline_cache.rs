//! Pipeline state objects keyed by program and fixed-function toggles
//!
//! D3D12 bakes rasterizer, depth and blend state into an immutable PSO, so
//! every toggle combination a program is drawn with needs its own object.
//! They are built on first use and reused afterwards.

use rustc_hash::FxHashMap;

use super::d3d12_device::{HResult, TopologyType};
use crate::renderer::{FixedFunctionState, Handle};

/// `program` is `Handle::NULL` for the built-in default program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub program: Handle,
    pub fixed: FixedFunctionState,
    pub topology: TopologyType,
}

/// Cache of `P`, the device's pipeline state handle
pub struct PipelineCache<P> {
    entries: FxHashMap<PipelineKey, P>,
    hits: u64,
    misses: u64,
}

impl<P: Clone> PipelineCache<P> {
    pub fn new() -> Self {
        Self {
            entries: FxHashMap::default(),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached PSO for `key`, created with `create` on a miss
    ///
    /// A failed creation is not cached.
    pub fn get_or_create(
        &mut self,
        key: PipelineKey,
        create: impl FnOnce() -> Result<P, HResult>,
    ) -> Result<P, HResult> {
        if let Some(pipeline) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(pipeline.clone());
        }
        self.misses += 1;
        let pipeline = create()?;
        self.entries.insert(key, pipeline.clone());
        Ok(pipeline)
    }

    /// Remove every PSO built for `program`
    pub fn evict_program(&mut self, program: Handle) -> Vec<P> {
        let keys: Vec<PipelineKey> = self.entries.keys().filter(|k| k.program == program).copied().collect();
        keys.into_iter().filter_map(|key| self.entries.remove(&key)).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }
}

impl<P: Clone> Default for PipelineCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "d3d12_pipeline_cache_tests.rs"]
mod tests;
