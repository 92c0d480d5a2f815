//! Scrub/dedup interaction.
//!
//! A block with N references should be scrubbed once, not N times. The
//! dedup table is ordered by replication class, highest first, so the scan
//! begins by walking the table and scrubbing every block with more than
//! one reference; the later tree walk skips anything the table covers.
//!
//! Reference counts move while the scan runs. A block that drops to one
//! reference after the pre-pass gets scrubbed a second time by the tree
//! walk, which is harmless. A block that rises above one reference after
//! the pre-pass would be missed entirely, so the table sync hands such
//! entries to the scan the moment they are promoted.

use crate::{
    core::{Bookmark, DdtEntry, DedupTable, Pool, Tx},
    scan::{scan_record::ScanState, ScanJob},
};

impl ScanJob {
    /// The dedup pre-pass: walk the table from the persisted cursor,
    /// scrubbing every in-window physical variant, until the cursor leaves
    /// the covered classes or the txg budget runs dry.
    pub(super) fn ddt_visit(&mut self, pool: &Pool, tx: &Tx) {
        let mut scanned = 0u64;

        loop {
            let entry = {
                let ddt = pool.ddt();
                // there should be no pending changes to the dedup table
                debug_assert!(!ddt.has_pending());
                let mut ddb = self.record.ddt_bookmark;
                let found = ddt.walk(&mut ddb);
                self.record.ddt_bookmark = ddb;
                found
            };

            let (checksum_fn, dde) = match entry {
                Some(found) => found,
                None => break,
            };

            if self.record.ddt_bookmark.class > self.record.ddt_class_max {
                break;
            }

            trace!("visiting dedup entry at {}", self.record.ddt_bookmark);
            self.ddt_entry(pool, checksum_fn, &dde, tx);
            scanned += 1;

            if self.check_pause(pool, None) {
                break;
            }
        }

        debug!(
            "scanned {} dedup entries with class_max = {}; pausing={}",
            scanned, self.record.ddt_class_max, self.pausing
        );
    }

    /// Scrub one dedup entry: every physical variant born inside the
    /// current window. Also invoked by the table sync when an entry's
    /// replication class rises mid-scan.
    pub(crate) fn ddt_entry(
        &mut self,
        pool: &Pool,
        checksum_fn: u64,
        dde: &DdtEntry,
        _tx: &Tx,
    ) {
        if self.record.state != ScanState::Scanning {
            return;
        }

        let zb = Bookmark::default();
        for phys in dde.phys.iter().flatten() {
            if phys.phys_birth == 0 || phys.phys_birth > self.record.cur_max_txg {
                continue;
            }
            let bp = DedupTable::bp_create(checksum_fn, dde.key, phys);
            self.issue_scan_cb(pool, &bp, &zb);
        }
    }
}
