//! Keel deduplication cache: last object written per resource identity.
//!
//! One instance is created at process start and shared (`Arc<DedupCache>`) by
//! every engine, so unrelated reconciles of the same objects skip redundant
//! writes. Nothing here touches the network.

#![forbid(unsafe_code)]

use std::sync::Arc;

use keel_core::{snapshot, DynamicObject, ResourceIdentity};
use metrics::counter;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::trace;

/// Snapshot of the last object written (normalized) and the generation the
/// server reported for it.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub snapshot: DynamicObject,
    pub generation: i64,
}

/// Concurrency-safe map from identity to [`CacheEntry`].
#[derive(Debug, Default)]
pub struct DedupCache {
    entries: RwLock<FxHashMap<ResourceIdentity, CacheEntry>>,
}

impl DedupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn get(&self, id: &ResourceIdentity) -> Option<CacheEntry> {
        self.entries.read().get(id).cloned()
    }

    /// Record `obj` as the last state written for `id`. Overwrites unconditionally.
    pub fn set(&self, id: ResourceIdentity, obj: &DynamicObject, generation: i64) {
        let entry = CacheEntry { snapshot: snapshot::normalize(obj), generation };
        trace!(id = %id, generation, "cache set");
        self.entries.write().insert(id, entry);
    }

    /// Invalidate `id`. Removing an absent entry is fine.
    pub fn delete(&self, id: &ResourceIdentity) {
        if self.entries.write().remove(id).is_some() {
            trace!(id = %id, "cache invalidated");
        }
    }

    /// Decide whether `obj` (the merged object about to be written, carrying the
    /// live generation) must be sent to the server:
    ///
    /// 1. no entry: never written from this process, write it;
    /// 2. live generation newer than cached: modified externally, write it;
    /// 3. identical to the cached snapshot: skip;
    /// 4. otherwise the caller changed the object, write it.
    pub fn needs_update(&self, id: &ResourceIdentity, obj: &DynamicObject) -> bool {
        let candidate = snapshot::normalize(obj);
        let live_generation = snapshot::generation(obj);
        let entries = self.entries.read();
        let Some(entry) = entries.get(id) else {
            trace!(id = %id, "not cached");
            return true;
        };
        if entry.generation < live_generation {
            trace!(id = %id, cached = entry.generation, live = live_generation, "modified on cluster since last write");
            return true;
        }
        if snapshot::same_object(&entry.snapshot, &candidate) {
            counter!("dedup_cache_hits_total", 1);
            return false;
        }
        trace!(id = %id, "desired state changed since last write");
        true
    }
}
