use std::sync::Arc;

use crate::{
    core::{Pool, Tx, Zio},
    scan::ScanJob,
};

/// The deferred-free drain: retire queued block frees at the head of the
/// txg, within the same wall-clock budget the traversal runs under.
impl ScanJob {
    /// Drain the persistent free list through `root`. Returns true when
    /// the budget ran out and entries remain queued; the caller yields the
    /// txg without traversing.
    pub(super) fn drain_frees(&mut self, pool: &Pool, root: &Arc<Zio>, tx: &Tx) -> bool {
        let mut meta = pool.meta();
        let fully_drained = meta.free_list.drain(|bp| {
            if self.free_budget_exhausted(pool) {
                return false;
            }
            root.free_nowait(bp.clone(), tx.txg);
            pool.space().charge_free(bp);
            self.visited_this_txg += 1;
            true
        });
        !fully_drained
    }

    /// The free drain's cut of the txg budget: the txg timeout, or the
    /// minimum free time once a sync is waiting, or a pool shutdown.
    fn free_budget_exhausted(&self, pool: &Pool) -> bool {
        let (timeout_ms, min_time_ms) = {
            let opts = pool.opts();
            (opts.txg_timeout_ms, opts.free_min_time_ms)
        };
        let elapsed = self
            .sync_start
            .map(|t| t.elapsed())
            .unwrap_or_default();

        elapsed.as_millis() as u64 > timeout_ms
            || (elapsed.as_micros() as u64 > min_time_ms * 1000 && pool.txg_sync_waiting())
            || pool.shutting_down()
    }
}
