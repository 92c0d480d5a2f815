use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::Mutex;

use crate::core::{BlockContents, BlockId};

/// The read cache sitting between the traversal and the devices. Buffers
/// are refcounted; a reader drops its reference when done.
#[derive(Debug, Default)]
pub struct BlockCache {
    map: Mutex<HashMap<BlockId, Arc<BlockContents>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    prefetches: AtomicU64,
}

impl BlockCache {
    pub fn lookup(&self, id: BlockId) -> Option<Arc<BlockContents>> {
        let found = self.map.lock().get(&id).cloned();
        match found {
            Some(contents) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(contents)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, id: BlockId, contents: Arc<BlockContents>) {
        self.map.lock().insert(id, contents);
    }

    pub fn evict(&self, id: BlockId) {
        self.map.lock().remove(&id);
    }

    /// Drop everything; done before a scan starts so reads really probe
    /// the devices.
    pub fn purge(&self) {
        self.map.lock().clear();
    }

    pub fn note_prefetch(&self) {
        self.prefetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn prefetches(&self) -> u64 {
        self.prefetches.load(Ordering::Relaxed)
    }
}
