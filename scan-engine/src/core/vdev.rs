use std::{collections::HashMap, sync::Arc};

use crate::core::{BlockContents, CoreError, Dva};

/// A set of inclusive txg ranges, kept sorted and coalesced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeList {
    ranges: Vec<(u64, u64)>,
}

impl RangeList {
    /// Add the inclusive range `[start, end]`, merging with neighbours.
    pub fn add(&mut self, start: u64, end: u64) {
        debug_assert!(start <= end);
        self.ranges.push((start, end));
        self.ranges.sort_unstable();
        let mut merged: Vec<(u64, u64)> = Vec::with_capacity(self.ranges.len());
        for &(s, e) in self.ranges.iter() {
            match merged.last_mut() {
                Some(last) if s <= last.1.saturating_add(1) => {
                    last.1 = last.1.max(e);
                }
                _ => merged.push((s, e)),
            }
        }
        self.ranges = merged;
    }

    /// Does any txg in `[start, start + span - 1]` fall in the list?
    pub fn contains_span(&self, start: u64, span: u64) -> bool {
        if span == 0 {
            return false;
        }
        let end = start + span - 1;
        self.ranges.iter().any(|&(s, e)| start <= e && s <= end)
    }

    /// Remove every txg in `[start, end]` from the list.
    pub fn excise(&mut self, start: u64, end: u64) {
        let mut next = Vec::with_capacity(self.ranges.len());
        for &(s, e) in self.ranges.iter() {
            if e < start || s > end {
                next.push((s, e));
                continue;
            }
            if s < start {
                next.push((s, start - 1));
            }
            if e > end {
                next.push((end + 1, e));
            }
        }
        self.ranges = next;
    }

    pub fn clear(&mut self) {
        self.ranges.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Lowest and highest txg in the list.
    pub fn span(&self) -> Option<(u64, u64)> {
        match (self.ranges.first(), self.ranges.last()) {
            (Some(&(s, _)), Some(&(_, e))) => Some((s, e)),
            _ => None,
        }
    }
}

/// The dirty-txg lists kept per device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlKind {
    /// Txgs the device definitely missed; drives resilver scope.
    Missing = 0,
    /// Txgs the device may have missed; checked per block during resilver.
    Partial = 1,
    /// Txgs queued for scrub repair; vacated when a scan ends.
    Scrub = 2,
    /// Txgs the device was out of service for.
    Outage = 3,
}

pub const DTL_KINDS: usize = 4;

/// A stored block: its decoded contents plus the checksum written with it.
#[derive(Debug, Clone)]
pub struct StoredBlock {
    pub contents: Arc<BlockContents>,
    pub checksum: u64,
}

/// One top-level device: a flat block store plus its dirty-txg lists.
#[derive(Debug)]
pub struct Vdev {
    pub id: u64,
    dtl: [RangeList; DTL_KINDS],
    store: HashMap<u64, StoredBlock>,
    next_offset: u64,
    allocated: u64,
    /// Times the device was reopened/probed.
    pub reopened: u64,
}

impl Vdev {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            dtl: Default::default(),
            store: HashMap::new(),
            next_offset: 0,
            allocated: 0,
            reopened: 0,
        }
    }

    /// Place a block on this device, returning the replica descriptor.
    pub fn alloc(&mut self, contents: Arc<BlockContents>, checksum: u64, asize: u64) -> Dva {
        let offset = self.next_offset;
        self.next_offset += asize.max(1);
        self.allocated += asize;
        self.store.insert(
            offset,
            StoredBlock {
                contents,
                checksum,
            },
        );
        Dva::new(self.id, offset, asize)
    }

    /// Release the replica described by `dva`.
    pub fn free_dva(&mut self, dva: &Dva) {
        if self.store.remove(&dva.offset).is_some() {
            self.allocated = self.allocated.saturating_sub(dva.asize);
        }
    }

    pub fn read(&self, offset: u64) -> Option<&StoredBlock> {
        self.store.get(&offset)
    }

    /// Overwrite the stored checksum, leaving the block pointer stale.
    pub fn corrupt(&mut self, offset: u64) -> bool {
        match self.store.get_mut(&offset) {
            Some(sb) => {
                sb.checksum = !sb.checksum;
                true
            }
            None => false,
        }
    }

    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn dtl(&self, kind: DtlKind) -> &RangeList {
        &self.dtl[kind as usize]
    }

    pub fn dtl_mut(&mut self, kind: DtlKind) -> &mut RangeList {
        &mut self.dtl[kind as usize]
    }
}

/// The device tree: a root aggregate over the top-level devices.
#[derive(Debug, Default)]
pub struct VdevTree {
    vdevs: Vec<Vdev>,
    /// Times the labels were marked dirty.
    pub config_dirtied: u64,
    /// Arguments of the most recent DTL reassessment, for status queries.
    pub last_reassess: Option<(u64, u64, bool)>,
}

impl VdevTree {
    pub fn new(nvdevs: u64) -> Self {
        Self {
            vdevs: (0..nvdevs).map(Vdev::new).collect(),
            config_dirtied: 0,
            last_reassess: None,
        }
    }

    pub fn vdev(&self, id: u64) -> Result<&Vdev, CoreError> {
        self.vdevs
            .get(id as usize)
            .ok_or(CoreError::VdevNotFound { vdev: id })
    }

    pub fn vdev_mut(&mut self, id: u64) -> Result<&mut Vdev, CoreError> {
        self.vdevs
            .get_mut(id as usize)
            .ok_or(CoreError::VdevNotFound { vdev: id })
    }

    /// Total bytes allocated across the tree.
    pub fn alloc_total(&self) -> u64 {
        self.vdevs.iter().map(|v| v.allocated()).sum()
    }

    /// Whether any device missed writes, and if so the txg window that a
    /// resilver has to cover. The returned bounds are exclusive on both
    /// ends so that the window comparison of the scan callback keeps every
    /// dirty txg in scope.
    pub fn resilver_needed(&self, min_txg: Option<&mut u64>, max_txg: Option<&mut u64>) -> bool {
        let mut needed = false;
        let mut lo = u64::MAX;
        let mut hi = 0u64;
        for vd in &self.vdevs {
            if let Some((s, e)) = vd.dtl(DtlKind::Missing).span() {
                needed = true;
                lo = lo.min(s);
                hi = hi.max(e);
            }
        }
        if needed {
            if let Some(min_txg) = min_txg {
                *min_txg = lo.saturating_sub(1);
            }
            if let Some(max_txg) = max_txg {
                *max_txg = hi + 1;
            }
        }
        needed
    }

    pub fn dtl_contains(&self, vdev: u64, kind: DtlKind, txg: u64, span: u64) -> bool {
        match self.vdev(vdev) {
            Ok(vd) => vd.dtl(kind).contains_span(txg, span),
            Err(_) => false,
        }
    }

    /// Reassess the dirty-txg lists after a scan. A completed scrub excises
    /// everything up to `scrub_txg` from the missing and partial lists;
    /// scrub-temporary lists are vacated regardless.
    pub fn dtl_reassess(&mut self, txg: u64, scrub_txg: u64, scrub_done: bool) {
        for vd in self.vdevs.iter_mut() {
            if scrub_done && scrub_txg != 0 {
                vd.dtl_mut(DtlKind::Missing).excise(0, scrub_txg);
                vd.dtl_mut(DtlKind::Partial).excise(0, scrub_txg);
            }
            vd.dtl_mut(DtlKind::Scrub).clear();
        }
        self.last_reassess = Some((txg, scrub_txg, scrub_done));
    }

    /// Purge device caches and probe every device.
    pub fn reopen(&mut self) {
        for vd in self.vdevs.iter_mut() {
            vd.reopened += 1;
        }
    }

    /// Mark all disk labels dirty.
    pub fn config_dirty(&mut self) {
        self.config_dirtied += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_list_merges_neighbours() {
        let mut rl = RangeList::default();
        rl.add(5, 10);
        rl.add(11, 12);
        rl.add(20, 25);
        assert!(rl.contains_span(10, 1));
        assert!(rl.contains_span(12, 1));
        assert!(!rl.contains_span(13, 1));
        assert!(rl.contains_span(13, 10));
        assert_eq!(rl.span(), Some((5, 25)));
    }

    #[test]
    fn range_list_excise_splits() {
        let mut rl = RangeList::default();
        rl.add(1, 100);
        rl.excise(10, 20);
        assert!(rl.contains_span(9, 1));
        assert!(!rl.contains_span(10, 1));
        assert!(!rl.contains_span(20, 1));
        assert!(rl.contains_span(21, 1));
    }

    #[test]
    fn resilver_window_is_exclusive() {
        let mut tree = VdevTree::new(2);
        tree.vdev_mut(1).unwrap().dtl_mut(DtlKind::Missing).add(50, 60);
        let (mut lo, mut hi) = (0, 0);
        assert!(tree.resilver_needed(Some(&mut lo), Some(&mut hi)));
        assert_eq!((lo, hi), (49, 61));
    }

    #[test]
    fn reassess_excises_on_complete_only() {
        let mut tree = VdevTree::new(1);
        tree.vdev_mut(0).unwrap().dtl_mut(DtlKind::Missing).add(5, 9);
        tree.vdev_mut(0).unwrap().dtl_mut(DtlKind::Scrub).add(1, 3);

        tree.dtl_reassess(100, 0, true);
        assert!(!tree.vdev(0).unwrap().dtl(DtlKind::Missing).is_empty());
        assert!(tree.vdev(0).unwrap().dtl(DtlKind::Scrub).is_empty());

        tree.dtl_reassess(101, 50, true);
        assert!(tree.vdev(0).unwrap().dtl(DtlKind::Missing).is_empty());
        assert_eq!(tree.last_reassess, Some((101, 50, true)));
    }
}
