use std::{collections::BTreeMap, fmt};

use crate::core::{BlockKind, BlockPointer, Dva};

/// Replication class of a dedup table entry, in walk order: the highest
/// replication class first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DdtClass {
    /// Automatically replicated beyond the pool's copies setting.
    Ditto = 0,
    /// Referenced more than once.
    Duplicate = 1,
    /// Referenced exactly once.
    Unique = 2,
}

impl DdtClass {
    pub const COUNT: u64 = 3;

    pub fn from_index(index: u64) -> Option<Self> {
        match index {
            0 => Some(DdtClass::Ditto),
            1 => Some(DdtClass::Duplicate),
            2 => Some(DdtClass::Unique),
            _ => None,
        }
    }
}

/// Checksum functions a dedup table may be keyed under.
pub const CHECKSUM_FNS: u64 = 2;

/// Physical variants per entry (different copies settings share a key).
pub const DDT_PHYS_TYPES: usize = 4;

/// Dedup key: the checksum of the block contents.
pub type DdtKey = u64;

/// One physical variant of a dedup entry.
#[derive(Debug, Clone, PartialEq)]
pub struct DdtPhys {
    pub dvas: Vec<Dva>,
    pub phys_birth: u64,
    pub refcnt: u64,
    pub lsize: u64,
    pub psize: u64,
}

/// One dedup table entry: the key plus its physical variants.
#[derive(Debug, Clone, PartialEq)]
pub struct DdtEntry {
    pub key: DdtKey,
    pub phys: [Option<DdtPhys>; DDT_PHYS_TYPES],
}

impl DdtEntry {
    pub fn new(key: DdtKey, phys: DdtPhys) -> Self {
        let mut entry = Self {
            key,
            phys: Default::default(),
        };
        entry.phys[0] = Some(phys);
        entry
    }

    /// Total references over all physical variants.
    pub fn refcnt(&self) -> u64 {
        self.phys.iter().flatten().map(|p| p.refcnt).sum()
    }
}

/// Persisted cursor into the dedup table: `<class, type, checksum,
/// cursor>`. The walk enumerates classes in replication order and
/// remembers the key to continue from within each bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DdtBookmark {
    pub class: u64,
    pub kind: u64,
    pub checksum: u64,
    pub cursor: u64,
}

impl fmt::Display for DdtBookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}/{:x}/{:x}/{:x}",
            self.class, self.kind, self.checksum, self.cursor
        )
    }
}

/// A pending reference count change, applied when the table syncs.
#[derive(Debug, Clone)]
pub struct RefDelta {
    pub checksum_fn: u64,
    pub key: DdtKey,
    pub delta: i64,
}

/// The deduplicated-block index, bucketed per checksum function and
/// ordered by key. An entry's replication class derives from its current
/// reference count.
#[derive(Debug)]
pub struct DedupTable {
    tables: Vec<BTreeMap<DdtKey, DdtEntry>>,
    pending: Vec<RefDelta>,
    /// Reference count at which an entry is replicated further and enters
    /// the ditto class.
    pub ditto_threshold: u64,
}

impl DedupTable {
    pub fn new() -> Self {
        Self {
            tables: (0..CHECKSUM_FNS).map(|_| BTreeMap::new()).collect(),
            pending: Vec::new(),
            ditto_threshold: 100,
        }
    }

    pub fn insert(&mut self, checksum_fn: u64, entry: DdtEntry) {
        self.tables[checksum_fn as usize].insert(entry.key, entry);
    }

    pub fn get(&self, checksum_fn: u64, key: DdtKey) -> Option<&DdtEntry> {
        self.tables[checksum_fn as usize].get(&key)
    }

    /// Class an entry belongs to, given its current reference count.
    pub fn class_of(&self, entry: &DdtEntry) -> DdtClass {
        class_for(entry.refcnt(), self.ditto_threshold)
    }

    /// Whether the table covers `bp` at a class at or above (numerically
    /// at or below) `max_class`. Blocks the pre-pass already handled are
    /// skipped by the tree traversal through this test.
    pub fn class_contains(&self, max_class: u64, bp: &BlockPointer) -> bool {
        if !bp.dedup {
            return false;
        }
        self.tables.iter().any(|tbl| match tbl.get(&bp.checksum) {
            Some(entry) => (self.class_of(entry) as u64) <= max_class,
            None => false,
        })
    }

    /// Advance the cursor to the next entry and return it along with the
    /// checksum function it is keyed under. Returns None when the walk is
    /// exhausted, leaving the cursor's class past the last one.
    pub fn walk(&self, ddb: &mut DdtBookmark) -> Option<(u64, DdtEntry)> {
        loop {
            if ddb.class >= DdtClass::COUNT {
                return None;
            }
            let class = DdtClass::from_index(ddb.class).unwrap();
            let table = &self.tables[ddb.checksum as usize];
            let next = table
                .range(ddb.cursor..)
                .find(|&(_, entry)| self.class_of(entry) == class);
            if let Some((key, entry)) = next {
                // continue after this key on the next call
                ddb.cursor = key.saturating_add(1);
                return Some((ddb.checksum, entry.clone()));
            }
            // bucket exhausted: next checksum function, then (with a
            // single entry kind in use) the next class
            ddb.cursor = 0;
            ddb.checksum += 1;
            if ddb.checksum >= CHECKSUM_FNS {
                ddb.checksum = 0;
                ddb.kind = 0;
                ddb.class += 1;
            }
        }
    }

    /// Queue a reference count change for the next table sync.
    pub fn bump_ref(&mut self, checksum_fn: u64, key: DdtKey, delta: i64) {
        self.pending.push(RefDelta {
            checksum_fn,
            key,
            delta,
        });
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Apply queued reference count changes. Returns the entries whose
    /// class rose (moved to a numerically lower class) so an active scan
    /// can cover them immediately.
    pub fn apply_pending(&mut self) -> Vec<(u64, DdtEntry)> {
        let pending = std::mem::take(&mut self.pending);
        let threshold = self.ditto_threshold;
        let mut promoted = Vec::new();
        for delta in pending {
            let table = &mut self.tables[delta.checksum_fn as usize];
            let entry = match table.get_mut(&delta.key) {
                Some(entry) => entry,
                None => continue,
            };
            let old_class = class_for(entry.refcnt(), threshold);
            if let Some(phys) = entry.phys.iter_mut().flatten().next() {
                phys.refcnt = (phys.refcnt as i64 + delta.delta).max(0) as u64;
            }
            let new_class = class_for(entry.refcnt(), threshold);
            if new_class < old_class {
                promoted.push((delta.checksum_fn, entry.clone()));
            }
        }
        promoted
    }

    /// Synthesize a block pointer for one physical variant of an entry.
    pub fn bp_create(checksum_fn: u64, key: DdtKey, phys: &DdtPhys) -> BlockPointer {
        let _ = checksum_fn;
        BlockPointer {
            dvas: phys.dvas.clone(),
            lsize: phys.lsize,
            psize: phys.psize,
            birth_txg: phys.phys_birth,
            phys_birth: phys.phys_birth,
            checksum: key,
            kind: BlockKind::Data,
            level: 0,
            dedup: true,
        }
    }
}

impl Default for DedupTable {
    fn default() -> Self {
        Self::new()
    }
}

fn class_for(refcnt: u64, ditto_threshold: u64) -> DdtClass {
    if refcnt >= ditto_threshold {
        DdtClass::Ditto
    } else if refcnt > 1 {
        DdtClass::Duplicate
    } else {
        DdtClass::Unique
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phys(birth: u64, refcnt: u64) -> DdtPhys {
        DdtPhys {
            dvas: vec![Dva::new(0, 0, 512)],
            phys_birth: birth,
            refcnt,
            lsize: 4096,
            psize: 512,
        }
    }

    #[test]
    fn walk_orders_by_class_then_key() {
        let mut ddt = DedupTable::new();
        ddt.insert(0, DdtEntry::new(10, phys(5, 1)));
        ddt.insert(0, DdtEntry::new(20, phys(5, 3)));
        ddt.insert(1, DdtEntry::new(15, phys(5, 200)));

        let mut ddb = DdtBookmark::default();
        let mut seen = Vec::new();
        while let Some((cksfn, entry)) = ddt.walk(&mut ddb) {
            seen.push((cksfn, entry.key));
        }
        // ditto first, then duplicate, then unique
        assert_eq!(seen, vec![(1, 15), (0, 20), (0, 10)]);
        assert!(ddb.class >= DdtClass::COUNT);
    }

    #[test]
    fn walk_resumes_from_cursor() {
        let mut ddt = DedupTable::new();
        ddt.insert(0, DdtEntry::new(10, phys(5, 3)));
        ddt.insert(0, DdtEntry::new(20, phys(5, 3)));

        let mut ddb = DdtBookmark::default();
        let first = ddt.walk(&mut ddb).unwrap();
        assert_eq!(first.1.key, 10);

        // a fresh walk from the persisted cursor skips the consumed entry
        let mut resumed = ddb;
        let second = ddt.walk(&mut resumed).unwrap();
        assert_eq!(second.1.key, 20);
    }

    #[test]
    fn class_contains_tracks_refcnt() {
        let mut ddt = DedupTable::new();
        ddt.insert(0, DdtEntry::new(10, phys(5, 1)));
        let bp = DedupTable::bp_create(0, 10, &phys(5, 1));
        assert!(!ddt.class_contains(DdtClass::Duplicate as u64, &bp));
        assert!(ddt.class_contains(DdtClass::Unique as u64, &bp));

        ddt.bump_ref(0, 10, 2);
        let promoted = ddt.apply_pending();
        assert_eq!(promoted.len(), 1);
        assert!(ddt.class_contains(DdtClass::Duplicate as u64, &bp));
    }

    #[test]
    fn refcnt_drop_does_not_promote() {
        let mut ddt = DedupTable::new();
        ddt.insert(0, DdtEntry::new(10, phys(5, 4)));
        ddt.bump_ref(0, 10, -3);
        assert!(ddt.apply_pending().is_empty());
    }
}
