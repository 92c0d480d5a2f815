use crate::{
    core::{Pool, Tx},
    scan::ScanJob,
};

/// Operations on the on-disk dataset work queue: a key/value object
/// mapping dataset object id to the minimum txg to visit in it.
impl ScanJob {
    /// Enqueue `dsobj` at `mintxg`. Each dataset appears at most once.
    pub(super) fn queue_add(&self, pool: &Pool, dsobj: u64, mintxg: u64) {
        pool.meta()
            .kv
            .add_int_key(self.record.queue_obj, dsobj, mintxg)
            .expect("a dataset is enqueued at most once");
    }

    /// Remove `dsobj` from the queue.
    pub(super) fn queue_remove(&self, pool: &Pool, dsobj: u64) {
        pool.meta()
            .kv
            .remove_int(self.record.queue_obj, dsobj)
            .expect("removed queue entries exist");
    }

    /// If `dsobj` is queued, drop it and return its mintxg.
    pub(super) fn queue_remove_if_present(&self, pool: &Pool, dsobj: u64) -> Option<u64> {
        let mut meta = pool.meta();
        match meta.kv.lookup_int_key(self.record.queue_obj, dsobj) {
            Ok(mintxg) => {
                meta.kv
                    .remove_int(self.record.queue_obj, dsobj)
                    .expect("entry looked up just now");
                Some(mintxg)
            }
            Err(_) => None,
        }
    }

    /// Splice a snapshot's clone list straight into the queue, every clone
    /// at `mintxg`.
    pub(super) fn queue_join(
        &self,
        pool: &Pool,
        clones_obj: u64,
        mintxg: u64,
    ) -> Result<(), crate::core::CoreError> {
        pool.meta()
            .kv
            .join_key(clones_obj, self.record.queue_obj, mintxg)
    }

    /// Walk each filesystem back through its linear snapshot chain and
    /// enqueue the oldest reachable snapshot at its previous-snapshot txg.
    /// Used on pools predating the origin-rooted traversal.
    pub(super) fn enqueue_all(&mut self, pool: &Pool, _tx: &Tx) {
        let filesystems = pool.datasets().filesystems();
        'next_fs: for fsobj in filesystems {
            let mut ds = match pool.datasets().hold(fsobj) {
                Ok(ds) => ds,
                Err(_) => continue,
            };

            while ds.prev_snap_obj != 0 {
                let prev = match pool.datasets().hold(ds.prev_snap_obj) {
                    Ok(prev) => prev,
                    Err(_) => continue 'next_fs,
                };

                // A clone: its origin's chain covers it when that chain is
                // visited, so nothing to enqueue here.
                if prev.next_snap_obj != ds.object {
                    continue 'next_fs;
                }
                ds = prev;
            }

            self.queue_add(pool, ds.object, ds.prev_snap_txg);
        }
    }

    /// Enqueue every clone descending from `originobj`, each walked back
    /// to the snapshot right after the origin.
    pub(super) fn enqueue_clones(&mut self, pool: &Pool, originobj: u64, _tx: &Tx) {
        let filesystems = pool.datasets().filesystems();
        for fsobj in filesystems {
            let ds = match pool.datasets().hold(fsobj) {
                Ok(ds) => ds,
                Err(_) => continue,
            };
            if ds.origin_obj != originobj {
                continue;
            }

            let mut ds = ds;
            while ds.prev_snap_obj != originobj {
                match pool.datasets().hold(ds.prev_snap_obj) {
                    Ok(prev) => ds = prev,
                    Err(_) => break,
                }
            }
            self.queue_add(pool, ds.object, ds.prev_snap_txg);
        }
    }
}
