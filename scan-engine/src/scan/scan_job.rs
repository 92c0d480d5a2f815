use std::{sync::Arc, time::Instant};

use chrono::Utc;

use crate::{
    core::{
        AsyncRequest,
        Bookmark,
        DdtClass,
        HistoryKind,
        Pool,
        Tx,
        Zio,
        ZioFlags,
        DESTROYED_OBJSET,
        DIRECTORY_OBJECT,
        DIR_SCAN,
        LEGACY_SCRUB_NAMES,
        META_OBJSET,
        TXG_INITIAL,
        VERSION_DEADLISTS,
        VERSION_SCAN,
        VERSION_SCAN_QUEUE,
    },
    eventing::EventAction,
    scan::{
        scan_record::{ScanFunc, ScanRecord, ScanState},
        scan_stats::{BlockStats, ScanStatus},
        ScanError,
    },
};

/// The scan coordinator: one per pool, driven once per txg from sync
/// context. Owns the persisted record and the in-memory traversal state
/// of the current txg.
pub struct ScanJob {
    pub(super) record: ScanRecord,
    /// Requested restart point; zero when none.
    pub(super) restart_txg: u64,
    /// Set when the pause predicate fired during this txg.
    pub(super) pausing: bool,
    /// Monotonic start of the current sync pass.
    pub(super) sync_start: Option<Instant>,
    /// Scan callback invocations during this txg, counted separately for
    /// the free drain and the traversal.
    pub(super) visited_this_txg: u64,
    /// Root I/O handle of the current sync pass.
    pub(super) io_root: Option<Arc<Zio>>,
    /// Block statistics for the current scan; absent when resuming after
    /// an import, so partial numbers are never reported.
    pub(super) stats: Option<Box<BlockStats>>,
}

impl ScanJob {
    pub fn new() -> Self {
        Self {
            record: ScanRecord::default(),
            restart_txg: 0,
            pausing: false,
            sync_start: None,
            visited_this_txg: 0,
            io_root: None,
            stats: None,
        }
    }

    /// The persisted record.
    pub fn record(&self) -> &ScanRecord {
        &self.record
    }

    pub(super) fn is_scrub_resilver(&self) -> bool {
        matches!(self.record.func, ScanFunc::Scrub | ScanFunc::Resilver)
    }

    /// Load persisted state on pool import. Absent state leaves the engine
    /// inert. Two legacy conditions schedule a restart: an old-style scrub
    /// marker, and a record last written by older software.
    pub(crate) fn init(&mut self, pool: &Pool, txg: u64) -> Result<(), ScanError> {
        {
            let meta = pool.meta();
            if meta.kv.lookup(DIRECTORY_OBJECT, "scrub_func").is_some() {
                // An old-style scrub was in progress. Restart a new-style
                // scrub from the beginning.
                self.restart_txg = txg;
                info!(
                    "old-style scrub was in progress; restarting new-style scrub in txg {}",
                    txg
                );
                // keep the old queue object so it can be freed on done
                if let Some(queue) = meta.kv.lookup(DIRECTORY_OBJECT, "scrub_queue") {
                    self.record.queue_obj = queue.first().copied().unwrap_or(0);
                }
            } else if let Some(raw) = meta.kv.lookup(DIRECTORY_OBJECT, DIR_SCAN) {
                self.record = ScanRecord::from_raw(&raw)?;
                if self.record.state == ScanState::Scanning
                    && pool.prev_software_version() < VERSION_SCAN
                {
                    // The record was modified by older software; it may
                    // have changed the pool under us.
                    self.restart_txg = txg;
                    info!(
                        "scan record was modified by older software; restarting in txg {}",
                        txg
                    );
                }
            }
        }
        pool.scan_stat_init();
        Ok(())
    }

    /// Gate for `setup_sync`.
    pub(crate) fn setup_check(&self) -> Result<(), ScanError> {
        if self.record.state == ScanState::Scanning {
            return Err(ScanError::Busy {});
        }
        Ok(())
    }

    /// Begin a new scan: write a fresh record, create the work queue and
    /// zero the statistics. For scrub/resilver the device tree decides
    /// which of the two this actually is.
    pub(crate) fn setup_sync(&mut self, pool: &Pool, func: ScanFunc, tx: &Tx) {
        debug_assert!(self.record.state != ScanState::Scanning);

        self.record = ScanRecord::default();
        self.record.func = func;
        self.record.state = ScanState::Scanning;
        self.record.min_txg = 0;
        self.record.max_txg = tx.txg;
        // the entire dedup table
        self.record.ddt_class_max = DdtClass::COUNT - 1;
        self.record.start_time = Utc::now().timestamp() as u64;
        self.record.to_examine = pool.vdevs().alloc_total();
        self.restart_txg = 0;
        self.pausing = false;
        pool.scan_stat_init();

        if self.is_scrub_resilver() {
            self.record.ddt_class_max = pool.opts().scrub_ddt_class_max as u64;

            // rewrite all disk labels
            pool.vdevs_mut().config_dirty();

            let (mut min, mut max) = (0u64, 0u64);
            let needed = pool
                .vdevs()
                .resilver_needed(Some(&mut min), Some(&mut max));
            if needed {
                self.record.min_txg = min;
                self.record.max_txg = max;
                self.record.func = ScanFunc::Resilver;
                pool.notify_event(EventAction::ResilverStart);
            } else {
                pool.notify_event(EventAction::ScrubStart);
            }
            pool.set_scrub_started(true);

            // An incremental scrub limits the dedup pre-pass to the ditto
            // class; the rest goes faster with top-down pruning.
            if self.record.min_txg > TXG_INITIAL {
                self.record.ddt_class_max = DdtClass::Ditto as u64;
            }
        }

        self.stats = Some(Box::new(BlockStats::default()));

        self.record.queue_obj = {
            let mut meta = pool.meta();
            let id = meta.alloc_object();
            meta.kv.create(id);
            id
        };

        self.sync_state(pool, tx);

        pool.history_log(
            HistoryKind::PoolScan,
            tx.txg,
            format!(
                "func={} mintxg={} maxtxg={}",
                self.record.func, self.record.min_txg, self.record.max_txg
            ),
        );
        info!(
            "pool {}: {} started, txg window [{}, {}]",
            pool.name(),
            self.record.func,
            self.record.min_txg,
            self.record.max_txg
        );
    }

    /// Gate for cancel.
    pub(crate) fn cancel_check(&self) -> Result<(), ScanError> {
        if self.record.state != ScanState::Scanning {
            return Err(ScanError::NotFound {});
        }
        Ok(())
    }

    /// Tear down the scan: free the queue object, drop legacy directory
    /// names, settle in-flight I/O and update the device DTLs.
    pub(crate) fn done(&mut self, pool: &Pool, complete: bool, tx: &Tx) {
        {
            let mut meta = pool.meta();
            // remove any remnants of an old-style scrub
            for name in LEGACY_SCRUB_NAMES.iter() {
                let _ = meta.kv.remove(DIRECTORY_OBJECT, name);
            }
            if self.record.queue_obj != 0 {
                if meta.kv.destroy(self.record.queue_obj).is_err() {
                    // a legacy queue recorded at import may never have
                    // made it to disk
                    warn!("scan queue object {} was already gone", self.record.queue_obj);
                }
                self.record.queue_obj = 0;
            }
        }

        // restarted from a stopped state; nothing else to unwind
        if self.record.state != ScanState::Scanning {
            return;
        }

        self.record.state = if complete {
            ScanState::Finished
        } else {
            ScanState::Canceled
        };
        pool.history_log(
            HistoryKind::PoolScanDone,
            tx.txg,
            format!("complete={}", complete),
        );

        if self.is_scrub_resilver() {
            pool.scrub_drain();
            self.record.errors += pool.take_scrub_errors();
            pool.set_scrub_started(false);
            pool.set_scrub_active(false);

            // A completed scan clears the missed-write history up to its
            // window; temporary scrub DTLs are vacated either way.
            pool.vdevs_mut().dtl_reassess(
                tx.txg,
                if complete { self.record.max_txg } else { 0 },
                true,
            );
            if complete {
                pool.notify_event(match self.record.func {
                    ScanFunc::Resilver => EventAction::ResilverFinish,
                    _ => EventAction::ScrubFinish,
                });
            }
            pool.errlog_rotate();

            // a device replacement may now be complete; let the async
            // task assess the detach
            pool.async_request(AsyncRequest::ResilverDone);
        }

        self.record.end_time = Utc::now().timestamp() as u64;
        info!(
            "pool {}: {} {} with {} errors",
            pool.name(),
            self.record.func,
            self.record.state,
            self.record.errors
        );
    }

    /// Persist the record into the pool directory.
    pub(crate) fn sync_state(&mut self, pool: &Pool, _tx: &Tx) {
        let raw = self.record.to_raw();
        pool.meta()
            .kv
            .update(DIRECTORY_OBJECT, DIR_SCAN, &raw)
            .expect("pool directory is always present");
    }

    /// True while there is scan or deferred-free work outstanding.
    pub(crate) fn active(&self, pool: &Pool) -> bool {
        if pool.loading() || pool.shutting_down() {
            return false;
        }
        if self.record.state == ScanState::Scanning {
            return true;
        }
        if pool.version() >= VERSION_DEADLISTS {
            let (used, _comp, _uncomp) = pool.meta().free_list.space();
            return used != 0;
        }
        false
    }

    pub(crate) fn resilvering(&self) -> bool {
        self.record.state == ScanState::Scanning && self.record.func == ScanFunc::Resilver
    }

    /// Schedule a scan restart; a zero txg means the next one.
    pub(crate) fn restart_resilver(&mut self, pool: &Pool, txg: u64) {
        let txg = if txg == 0 {
            pool.current_txg() + 1
        } else {
            txg
        };
        self.restart_txg = txg;
        info!("pool {}: restarting resilver at txg {}", pool.name(), txg);
    }

    /// The per-txg driver. Runs the deferred-free drain, then the dedup
    /// pre-pass and the dataset traversal, pausing on the way out whenever
    /// the txg's time budget runs dry.
    pub(crate) fn sync(&mut self, pool: &Pool, tx: &Tx) {
        // Check restart_txg before anything else so a restart scheduled
        // during import takes effect on the first sync.
        if self.restart_txg != 0 && self.restart_txg <= tx.txg {
            let mut func = ScanFunc::Scrub;
            if pool.vdevs().resilver_needed(None, None) {
                func = ScanFunc::Resilver;
            }
            info!("restarting scan func={} txg={}", func, tx.txg);
            self.done(pool, false, tx);
            self.setup_sync(pool, func, tx);
        }

        if !self.active(pool) || tx.pass > 1 {
            return;
        }

        self.visited_this_txg = 0;
        self.pausing = false;
        self.sync_start = Some(Instant::now());
        pool.set_scrub_active(true);

        // First process the free list. If the drain runs out of budget, no
        // traversal happens this txg: the scan never has to worry about
        // walking into queued frees.
        if pool.version() >= VERSION_DEADLISTS {
            let root = Zio::root(pool, ZioFlags::MUSTSUCCEED);
            self.io_root = Some(root.clone());
            let restarted = self.drain_frees(pool, &root, tx);
            root.wait();
            self.io_root = None;
            if self.visited_this_txg > 0 {
                info!(
                    "freed {} blocks in {}ms from the free list, txg {}",
                    self.visited_this_txg,
                    self.elapsed_ms(),
                    tx.txg
                );
                self.visited_this_txg = 0;
                // re-sync the dedup table so later rewrites see it
                self.ddt_resync(pool, tx);
            }
            if restarted {
                return;
            }
        }

        if self.record.state != ScanState::Scanning {
            return;
        }

        if self.record.ddt_bookmark.class <= self.record.ddt_class_max {
            debug_assert!(self.record.bookmark.is_zero());
            debug!(
                "scan sync txg {}; dedup cursor {}",
                tx.txg, self.record.ddt_bookmark
            );
        } else {
            debug!(
                "scan sync txg {}; bookmark {}",
                tx.txg, self.record.bookmark
            );
        }

        let root = Zio::root(pool, ZioFlags::CANFAIL);
        self.io_root = Some(root.clone());
        self.visit(pool, tx);
        root.wait();
        self.io_root = None;

        debug!(
            "visited {} blocks in {}ms",
            self.visited_this_txg,
            self.elapsed_ms()
        );

        if !self.pausing {
            if pool.opts().delay_completion {
                // test hook: hold the final transition open
                debug!("scan complete but completion is delayed");
            } else {
                debug!("finished scan in txg {}", tx.txg);
                self.done(pool, true, tx);
            }
        }

        if self.is_scrub_resilver() {
            pool.scrub_drain();
            self.record.errors += pool.take_scrub_errors();
        }

        self.sync_state(pool, tx);
    }

    /// One pass of scan work: dedup pre-pass, then the dataset the
    /// bookmark points at, then the work queue.
    pub(super) fn visit(&mut self, pool: &Pool, tx: &Tx) {
        if self.record.ddt_bookmark.class <= self.record.ddt_class_max {
            self.record.cur_min_txg = self.record.min_txg;
            self.record.cur_max_txg = self.record.max_txg;
            self.ddt_visit(pool, tx);
            if self.pausing {
                return;
            }
        }

        if self.record.bookmark.objset == META_OBJSET {
            // the very first visit: the meta object set, then the origin
            self.record.cur_min_txg = self.record.min_txg;
            self.record.cur_max_txg = self.record.max_txg;
            let root_bp = pool.meta().root_bp();
            self.visit_rootbp(pool, None, &root_bp, tx);
            pool.set_root_bp(&root_bp);
            if self.pausing {
                return;
            }

            if pool.version() < VERSION_SCAN_QUEUE {
                self.enqueue_all(pool, tx);
            } else {
                let origin = pool.datasets().origin_snap;
                self.visit_ds(pool, origin, tx);
            }
            debug_assert!(!self.pausing);
        } else if self.record.bookmark.objset != DESTROYED_OBJSET {
            // resume the dataset we paused in; if it was destroyed the
            // bookmark names the destroyed sentinel and we fall through to
            // the queue
            let dsobj = self.record.bookmark.objset;
            self.visit_ds(pool, dsobj, tx);
            if self.pausing {
                return;
            }
        }

        // In case we paused right at the end of the dataset, zero the
        // bookmark so we don't think we are still resuming.
        self.record.bookmark = Bookmark::default();

        loop {
            let entry = pool
                .meta()
                .kv
                .first_int(self.record.queue_obj)
                .unwrap_or(None);
            let (dsobj, mintxg) = match entry {
                Some(e) => e,
                None => break,
            };
            self.queue_remove(pool, dsobj);

            let ds = match pool.datasets().hold(dsobj) {
                Ok(ds) => ds,
                Err(_) => {
                    warn!("queued dataset {} no longer exists; skipping", dsobj);
                    continue;
                }
            };
            self.record.cur_min_txg = if mintxg != 0 {
                self.record.min_txg.max(mintxg)
            } else {
                self.record.min_txg.max(ds.prev_snap_txg)
            };
            self.record.cur_max_txg = self.ds_maxtxg(&ds);

            self.visit_ds(pool, dsobj, tx);
            if self.pausing {
                return;
            }
        }
    }

    /// Apply pending dedup reference changes from within the scan itself;
    /// promoted entries are covered on the spot.
    pub(super) fn ddt_resync(&mut self, pool: &Pool, tx: &Tx) {
        let promoted = pool.ddt().apply_pending();
        for (checksum_fn, entry) in promoted {
            self.ddt_entry(pool, checksum_fn, &entry, tx);
        }
    }

    pub(super) fn elapsed_ms(&self) -> u64 {
        self.sync_start
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Status snapshot for rendering.
    pub(crate) fn status(&self, pool: &Pool) -> ScanStatus {
        let (pass_start, pass_exam) = pool.scrub_pass_stats();
        ScanStatus {
            func: self.record.func,
            state: self.record.state,
            start_time: self.record.start_time,
            end_time: self.record.end_time,
            to_examine: self.record.to_examine,
            examined: self.record.examined,
            processed: self.record.processed,
            errors: self.record.errors,
            pass_start,
            pass_exam,
            inflight: pool.scrub_inflight(),
        }
    }
}

impl Default for ScanJob {
    fn default() -> Self {
        Self::new()
    }
}
