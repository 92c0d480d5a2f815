use crate::{
    core::{BlockPointer, Bookmark, DtlKind, Pool, ZioFlags, ZIL_LEVEL},
    scan::{scan_record::ScanFunc, ScanJob},
};

/// The scrub/resilver half of the scan: deciding which blocks need I/O
/// and issuing the bounded asynchronous reads.
impl ScanJob {
    /// Hand one block to the scan callback for the current function.
    /// Every invocation is counted into `visited_this_txg`.
    pub(super) fn issue_scan_cb(&mut self, pool: &Pool, bp: &BlockPointer, zb: &Bookmark) {
        self.visited_this_txg += 1;
        match self.record.func {
            ScanFunc::Scrub | ScanFunc::Resilver => self.scrub_cb(pool, bp, zb),
            ScanFunc::None => {}
        }
    }

    /// The scrub/resilver callback: account the block, decide whether a
    /// read is needed, and issue it under the inflight limit.
    fn scrub_cb(&mut self, pool: &Pool, bp: &BlockPointer, zb: &Bookmark) {
        let phys_birth = bp.physical_birth();

        // not in the scan window
        if phys_birth <= self.record.min_txg || phys_birth >= self.record.max_txg {
            return;
        }

        if let Some(stats) = self.stats.as_mut() {
            stats.count_block(bp);
        }

        let mut flags = ZioFlags::SCRUB_THREAD | ZioFlags::RAW | ZioFlags::CANFAIL;
        let mut needs_io = match self.record.func {
            ScanFunc::Scrub => {
                flags |= ZioFlags::SCRUB;
                true
            }
            ScanFunc::Resilver => {
                flags |= ZioFlags::RESILVER;
                false
            }
            ScanFunc::None => unreachable!("scan callback without a function"),
        };

        // intent log blocks are expected to fail checksum once replayed
        if zb.level == ZIL_LEVEL {
            flags |= ZioFlags::SPECULATIVE;
        }

        {
            let vdevs = pool.vdevs();
            for dva in &bp.dvas {
                // progress accounting covers every replica, read or not
                self.record.examined += dva.asize;
                pool.scrub_pass_exam_add(dva.asize);

                if !needs_io {
                    if dva.gang {
                        // Gang members may be spread across devices; the
                        // window check above is the best estimate we have.
                        needs_io = true;
                    } else {
                        needs_io = vdevs.dtl_contains(
                            dva.vdev,
                            DtlKind::Partial,
                            phys_birth,
                            1,
                        );
                    }
                }
            }
        }

        if needs_io && !pool.opts().no_scrub_io {
            pool.scrub_admit();
            pool.scrub_read(bp, flags, zb);
        }
    }
}
