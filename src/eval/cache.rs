//! Memoization store with per-node version counters.
//!
//! A result is valid only if the node's version did not move while the
//! handler ran; the evaluator compares versions around each execution and
//! retries on mismatch. `invalidate_cascading` lives on the evaluator,
//! which owns the graph view; the cache itself only knows counters.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::eval::handlers::ThunkResult;
use crate::id::NodeId;

#[derive(Default)]
struct CacheState {
    results: HashMap<NodeId, ThunkResult>,
    versions: HashMap<NodeId, u64>,
}

#[derive(Default)]
pub struct CacheManager {
    state: Mutex<CacheState>,
}

impl CacheManager {
    pub fn new() -> Self {
        CacheManager::default()
    }

    pub fn get(&self, id: &NodeId) -> Option<ThunkResult> {
        self.lock().results.get(id).cloned()
    }

    pub fn set(&self, id: &NodeId, result: ThunkResult) {
        self.lock().results.insert(id.clone(), result);
    }

    pub fn delete(&self, id: &NodeId) {
        self.lock().results.remove(id);
    }

    /// Current version counter; nodes start at 0.
    pub fn version(&self, id: &NodeId) -> u64 {
        *self.lock().versions.get(id).unwrap_or(&0)
    }

    /// Bump the version and drop any stored result.
    pub fn invalidate(&self, id: &NodeId) -> u64 {
        let mut state = self.lock();
        let counter = state.versions.entry(id.clone()).or_insert(0);
        *counter += 1;
        let version = *counter;
        state.results.remove(id);
        version
    }

    pub fn cached_count(&self) -> usize {
        self.lock().results.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().expect("cache poisoned")
    }
}
