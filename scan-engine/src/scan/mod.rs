//!
//! The pool scan engine: visits every live block on behalf of scrub
//! (verify all checksums) and resilver (rewrite data onto repaired
//! devices), and drains the deferred-free queue at the head of every txg.
//!
//! The traversal is pausable and resumable across restarts: progress is a
//! bookmark persisted in the pool directory, plus an on-disk queue of
//! datasets still to visit. Deduplicated blocks are covered by a pre-pass
//! over the dedup table so the tree walk does not scrub them again.

mod scan_ddt;
mod scan_ds;
mod scan_error;
mod scan_free;
mod scan_io;
mod scan_job;
mod scan_queue;
mod scan_record;
mod scan_stats;
mod scan_visit;

pub use scan_error::ScanError;
pub use scan_job::ScanJob;
pub use scan_record::{
    ScanFlags,
    ScanFunc,
    ScanRecord,
    ScanState,
    SCAN_RECORD_NUMINTS,
};
pub use scan_stats::{BlockStat, BlockStats, ScanStatus};
