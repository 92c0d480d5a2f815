use crate::{
    core::{Bookmark, DatasetPhys, Pool, Tx, DESTROYED_OBJSET},
    scan::{
        scan_record::{ScanFlags, ScanState},
        ScanJob,
    },
};

/// The dataset visitor and the scan's reactions to dataset lifecycle
/// events.
impl ScanJob {
    /// The snapshot-aware ceiling of the scan window within one dataset.
    pub(super) fn ds_maxtxg(&self, ds: &DatasetPhys) -> u64 {
        if ds.is_snapshot {
            self.record.max_txg.min(ds.creation_txg)
        } else {
            self.record.max_txg
        }
    }

    /// Visit one dataset from its root block pointer; when the pass
    /// completes, queue its descendants (next snapshot and clones).
    pub(super) fn visit_ds(&mut self, pool: &Pool, dsobj: u64, tx: &Tx) {
        let ds = match pool.datasets().hold(dsobj) {
            Ok(ds) => ds,
            Err(_) => {
                warn!("dataset {} disappeared before its visit; skipping", dsobj);
                return;
            }
        };

        // the dataset object is rewritten as part of this txg
        pool.datasets().mark_dirty(dsobj);

        self.visit_rootbp(pool, Some(&ds), &ds.root_bp, tx);

        debug!(
            "scanned dataset {} ({}) with min={} max={}; pausing={}",
            dsobj, ds.name, self.record.cur_min_txg, self.record.cur_max_txg, self.pausing
        );

        if self.pausing {
            return;
        }

        // A snapshot destroyed mid-pass disturbed the traversal; give the
        // dataset another pass at the window it had.
        if self.record.flags.contains(ScanFlags::VISIT_DS_AGAIN) {
            debug!("incomplete pass over dataset {}; visiting again", dsobj);
            self.record.flags.remove(ScanFlags::VISIT_DS_AGAIN);
            self.queue_add(pool, dsobj, self.record.cur_max_txg);
            return;
        }

        // add descendants to the work queue
        if ds.next_snap_obj != 0 {
            self.queue_add(pool, ds.next_snap_obj, ds.creation_txg);
        }

        if ds.num_children > 1 {
            let mut use_clone_list = false;
            if ds.next_clones_obj != 0 {
                // The clone list may be short one entry, left behind by an
                // old upgrade path; only trust it when its count matches.
                match pool.meta().kv.count(ds.next_clones_obj) {
                    Ok(count) if count == ds.num_children - 1 => use_clone_list = true,
                    Ok(count) => {
                        warn!(
                            "dataset {} clone list holds {} entries, expected {}; \
                             falling back to a full dataset sweep",
                            dsobj,
                            count,
                            ds.num_children - 1
                        );
                    }
                    Err(_) => {}
                }
            }

            if use_clone_list {
                self.queue_join(pool, ds.next_clones_obj, ds.creation_txg)
                    .expect("clones are not already queued");
            } else {
                self.enqueue_clones(pool, dsobj, tx);
            }
        }
    }

    /// A dataset is being destroyed. If it is the one under traversal,
    /// move the bookmark to its successor (snapshots) or give up on it
    /// (heads); if it sits in the queue, hand its slot to the successor.
    pub(crate) fn ds_destroyed(&mut self, pool: &Pool, ds: &DatasetPhys, tx: &Tx) {
        if self.record.state != ScanState::Scanning {
            return;
        }

        if self.record.bookmark.objset == ds.object {
            if ds.is_snapshot {
                // the traversal window cur_min/cur_max stays the same
                self.record.bookmark.objset = ds.next_snap_obj;
                self.record.flags.insert(ScanFlags::VISIT_DS_AGAIN);
                debug!(
                    "destroying dataset {} under traversal; moved bookmark to {}",
                    ds.object, ds.next_snap_obj
                );
            } else {
                self.record.bookmark = Bookmark {
                    objset: DESTROYED_OBJSET,
                    ..Bookmark::default()
                };
                debug!(
                    "destroying dataset {} under traversal; traversal abandoned",
                    ds.object
                );
            }
        } else if let Some(mintxg) = self.queue_remove_if_present(pool, ds.object) {
            debug_assert!(ds.num_children <= 1);
            if ds.is_snapshot {
                // The mintxg carries over; it can exceed the creation txg
                // when the previous snapshot was destroyed too.
                self.queue_add(pool, ds.next_snap_obj, mintxg);
                debug!(
                    "destroying dataset {} in queue; replaced with {}",
                    ds.object, ds.next_snap_obj
                );
            } else {
                debug!("destroying dataset {} in queue; removed", ds.object);
            }
        } else {
            debug!("destroying dataset {}; not referenced", ds.object);
        }

        // the next scan sync would persist this too, but don't leave a
        // window where the state on disk names a dead dataset
        self.sync_state(pool, tx);
    }

    /// A dataset was snapshotted: references to it transfer to the new
    /// previous snapshot.
    pub(crate) fn ds_snapshotted(&mut self, pool: &Pool, ds: &DatasetPhys, tx: &Tx) {
        if self.record.state != ScanState::Scanning {
            return;
        }

        debug_assert_ne!(ds.prev_snap_obj, 0);

        if self.record.bookmark.objset == ds.object {
            self.record.bookmark.objset = ds.prev_snap_obj;
            debug!(
                "snapshotting dataset {} under traversal; moved bookmark to {}",
                ds.object, ds.prev_snap_obj
            );
        } else if let Some(mintxg) = self.queue_remove_if_present(pool, ds.object) {
            self.queue_add(pool, ds.prev_snap_obj, mintxg);
            debug!(
                "snapshotting dataset {} in queue; replaced with {}",
                ds.object, ds.prev_snap_obj
            );
        }

        self.sync_state(pool, tx);
    }

    /// Two datasets swapped contents: swap whatever references the scan
    /// holds to either. When both sit in the queue, both stay.
    pub(crate) fn ds_clone_swapped(
        &mut self,
        pool: &Pool,
        ds1: &DatasetPhys,
        ds2: &DatasetPhys,
        tx: &Tx,
    ) {
        if self.record.state != ScanState::Scanning {
            return;
        }

        if self.record.bookmark.objset == ds1.object {
            self.record.bookmark.objset = ds2.object;
            debug!(
                "clone swap of dataset {} under traversal; bookmark now {}",
                ds1.object, ds2.object
            );
        } else if self.record.bookmark.objset == ds2.object {
            self.record.bookmark.objset = ds1.object;
            debug!(
                "clone swap of dataset {} under traversal; bookmark now {}",
                ds2.object, ds1.object
            );
        }

        if let Some(mintxg) = self.queue_remove_if_present(pool, ds1.object) {
            let mut meta = pool.meta();
            match meta.kv.add_int_key(self.record.queue_obj, ds2.object, mintxg) {
                Ok(()) => {}
                Err(_) => {
                    // both were queued to begin with; restore the first
                    meta.kv
                        .add_int_key(self.record.queue_obj, ds1.object, mintxg)
                        .expect("slot was just vacated");
                }
            }
            debug!(
                "clone swap of dataset {} in queue; replaced with {}",
                ds1.object, ds2.object
            );
        } else if let Some(mintxg) = self.queue_remove_if_present(pool, ds2.object) {
            self.queue_add(pool, ds1.object, mintxg);
            debug!(
                "clone swap of dataset {} in queue; replaced with {}",
                ds2.object, ds1.object
            );
        }

        self.sync_state(pool, tx);
    }
}
