use std::collections::VecDeque;

use crate::core::{BlockPointer, KvStore};

/// Object id of the pool directory, present from pool creation.
pub const DIRECTORY_OBJECT: u64 = 1;

/// Pool directory name of the scan state record.
pub const DIR_SCAN: &str = "scan";

/// Pool directory names used by the pre-unified scrub code. They are
/// removed whenever a scan finishes or is canceled.
pub const LEGACY_SCRUB_NAMES: [&str; 8] = [
    "scrub_bookmark",
    "scrub_ddt_bookmark",
    "scrub_ddt_class_max",
    "scrub_queue",
    "scrub_min_txg",
    "scrub_max_txg",
    "scrub_func",
    "scrub_errors",
];

/// The persistent queue of deferred block frees, drained at the head of
/// every txg before any traversal happens.
#[derive(Debug, Default)]
pub struct FreeList {
    bps: VecDeque<BlockPointer>,
}

impl FreeList {
    pub fn push(&mut self, bp: BlockPointer) {
        self.bps.push_back(bp);
    }

    pub fn is_empty(&self) -> bool {
        self.bps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bps.len()
    }

    /// Space still referenced by queued frees: (allocated, physical,
    /// logical) byte totals.
    pub fn space(&self) -> (u64, u64, u64) {
        self.bps.iter().fold((0, 0, 0), |acc, bp| {
            (acc.0 + bp.asize(), acc.1 + bp.psize, acc.2 + bp.lsize)
        })
    }

    /// Feed entries to `cb` in order, removing each entry the callback
    /// accepts. Returns true when the list was fully drained; false when
    /// the callback declined an entry (budget exhausted) and the remainder
    /// stays queued.
    pub fn drain(&mut self, mut cb: impl FnMut(&BlockPointer) -> bool) -> bool {
        while let Some(bp) = self.bps.front() {
            if !cb(bp) {
                return false;
            }
            self.bps.pop_front();
        }
        true
    }
}

/// The meta object set: object id allocation, the key/value objects with
/// the pool directory, the deferred free list and the meta root block
/// pointer.
#[derive(Debug)]
pub struct MetaObjset {
    next_object: u64,
    pub kv: KvStore,
    pub free_list: FreeList,
    root_bp: BlockPointer,
}

impl MetaObjset {
    pub fn new() -> Self {
        let mut kv = KvStore::default();
        kv.create(DIRECTORY_OBJECT);
        Self {
            next_object: DIRECTORY_OBJECT + 1,
            kv,
            free_list: FreeList::default(),
            root_bp: BlockPointer::hole(),
        }
    }

    /// Allocate a fresh object id.
    pub fn alloc_object(&mut self) -> u64 {
        let id = self.next_object;
        self.next_object += 1;
        id
    }

    pub fn root_bp(&self) -> BlockPointer {
        self.root_bp.clone()
    }

    pub fn set_root_bp(&mut self, bp: BlockPointer) {
        self.root_bp = bp;
    }
}

impl Default for MetaObjset {
    fn default() -> Self {
        Self::new()
    }
}
