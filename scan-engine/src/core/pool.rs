use std::{
    ops::Deref,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use chrono::Utc;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::{
    core::{
        runtime,
        BlockCache,
        BlockContents,
        BlockId,
        BlockPointer,
        Bookmark,
        CoreError,
        DatasetLayer,
        DatasetPhys,
        DedupTable,
        Dva,
        FaultKind,
        FaultRegistry,
        MetaObjset,
        Tx,
        TxgState,
        VdevTree,
        ZioFlags,
        TXG_INITIAL,
        VERSION_CURRENT,
    },
    eventing::{EventAction, EventDispatcher},
    scan::{ScanError, ScanFunc, ScanJob, ScanRecord, ScanStatus},
    subsys::ScanOpts,
};

/// Asynchronous pool maintenance requests raised by the engine and picked
/// up by the pool's background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncRequest {
    /// A resilver finished; device replacement may be completed.
    ResilverDone,
}

/// Maintenance requests waiting for the background task. A request is a
/// condition to act on, not a message: raising one that is already
/// pending leaves a single entry behind.
#[derive(Debug, Default)]
struct AsyncRequests {
    pending: Mutex<Vec<AsyncRequest>>,
}

impl AsyncRequests {
    fn raise(&self, req: AsyncRequest) {
        let mut pending = self.pending.lock();
        if !pending.contains(&req) {
            trace!("async request {:?} raised", req);
            pending.push(req);
        }
    }

    fn take(&self) -> Option<AsyncRequest> {
        let mut pending = self.pending.lock();
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }
}

/// Kinds of internal pool history records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryKind {
    PoolScan,
    PoolScanDone,
}

/// One line of the pool's internal history log.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub kind: HistoryKind,
    pub txg: u64,
    pub detail: String,
}

/// Space charged to the directory deferred frees are accounted against.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpaceStats {
    pub freeing_used: u64,
    pub freeing_comp: u64,
    pub freeing_uncomp: u64,
}

impl SpaceStats {
    /// Reduce the accounted space by one freed block.
    pub(crate) fn charge_free(&mut self, bp: &BlockPointer) {
        self.freeing_used = self.freeing_used.saturating_sub(bp.asize());
        self.freeing_comp = self.freeing_comp.saturating_sub(bp.psize);
        self.freeing_uncomp = self.freeing_uncomp.saturating_sub(bp.lsize);
    }
}

/// One scrub read issued by the scan, kept when the issued-I/O log is
/// enabled.
#[derive(Debug, Clone)]
pub struct IssuedIo {
    pub zb: Bookmark,
    pub block: BlockId,
    pub flags: ZioFlags,
}

#[derive(Debug, Default)]
struct ScrubState {
    inflight: u64,
    active: bool,
    started: bool,
    pending_errors: u64,
    pass_start: u64,
    pass_exam: u64,
    issued: Vec<IssuedIo>,
}

/// Scrub I/O admission control: a counter and condvar pair under the
/// pool's scrub lock.
#[derive(Debug, Default)]
struct ScrubIo {
    state: Mutex<ScrubState>,
    cv: Condvar,
}

#[derive(Debug, Default)]
struct ErrLogs {
    current: Vec<String>,
    last: Vec<String>,
}

/// Everything owned by one imported pool. Shared with the I/O runtime
/// through the [`Pool`] handle.
pub struct PoolInner {
    name: String,
    guid: Uuid,
    version: u64,
    prev_software_version: u64,
    first_txg: u64,
    writeable: bool,
    opts: RwLock<ScanOpts>,
    txg: Mutex<TxgState>,
    vdevs: RwLock<VdevTree>,
    meta: Mutex<MetaObjset>,
    datasets: Mutex<DatasetLayer>,
    ddt: Mutex<DedupTable>,
    cache: BlockCache,
    faults: FaultRegistry,
    scrub: ScrubIo,
    events: EventDispatcher,
    history: Mutex<Vec<HistoryEntry>>,
    errlog: Mutex<ErrLogs>,
    async_reqs: AsyncRequests,
    space: Mutex<SpaceStats>,
    root_bp: Mutex<BlockPointer>,
    shutdown: AtomicBool,
    loading: AtomicBool,
    scrub_reopen: AtomicBool,
    pub(crate) scan: Mutex<ScanJob>,
}

/// Cheap cloneable handle on a pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Deref for Pool {
    type Target = PoolInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Builds a pool for import. Versions and device count are fixed at build
/// time; everything else is populated afterwards through the layer
/// accessors.
pub struct PoolBuilder {
    name: String,
    opts: ScanOpts,
    nvdevs: u64,
    version: u64,
    prev_software_version: u64,
    first_txg: u64,
}

impl PoolBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            opts: ScanOpts::default(),
            nvdevs: 1,
            version: VERSION_CURRENT,
            prev_software_version: VERSION_CURRENT,
            first_txg: TXG_INITIAL,
        }
    }

    pub fn with_opts(mut self, opts: ScanOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn with_vdevs(mut self, nvdevs: u64) -> Self {
        self.nvdevs = nvdevs;
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn with_prev_software_version(mut self, version: u64) -> Self {
        self.prev_software_version = version;
        self
    }

    pub fn with_first_txg(mut self, txg: u64) -> Self {
        self.first_txg = txg;
        self
    }

    pub fn build(self) -> Pool {
        Pool {
            inner: Arc::new(PoolInner {
                name: self.name,
                guid: Uuid::new_v4(),
                version: self.version,
                prev_software_version: self.prev_software_version,
                first_txg: self.first_txg,
                writeable: true,
                opts: RwLock::new(self.opts),
                txg: Mutex::new(TxgState::new(self.first_txg)),
                vdevs: RwLock::new(VdevTree::new(self.nvdevs)),
                meta: Mutex::new(MetaObjset::new()),
                datasets: Mutex::new(DatasetLayer::default()),
                ddt: Mutex::new(DedupTable::new()),
                cache: BlockCache::default(),
                faults: FaultRegistry::default(),
                scrub: ScrubIo::default(),
                events: EventDispatcher::default(),
                history: Mutex::new(Vec::new()),
                errlog: Mutex::new(ErrLogs::default()),
                async_reqs: AsyncRequests::default(),
                space: Mutex::new(SpaceStats::default()),
                root_bp: Mutex::new(BlockPointer::hole()),
                shutdown: AtomicBool::new(false),
                loading: AtomicBool::new(false),
                scrub_reopen: AtomicBool::new(false),
                scan: Mutex::new(ScanJob::new()),
            }),
        }
    }
}

impl Pool {
    // ---- identity and flags ----

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn guid(&self) -> Uuid {
        self.inner.guid
    }

    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn prev_software_version(&self) -> u64 {
        self.inner.prev_software_version
    }

    pub fn first_txg(&self) -> u64 {
        self.inner.first_txg
    }

    pub fn writeable(&self) -> bool {
        self.inner.writeable
    }

    pub fn shutting_down(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn loading(&self) -> bool {
        self.inner.loading.load(Ordering::SeqCst)
    }

    pub fn set_loading(&self, loading: bool) {
        self.inner.loading.store(loading, Ordering::SeqCst);
    }

    /// Set while `scan_start` reopens the device tree, so device-open
    /// paths do not recursively kick off another scan.
    pub fn scrub_reopen(&self) -> bool {
        self.inner.scrub_reopen.load(Ordering::SeqCst)
    }

    // ---- layer accessors ----

    pub fn opts(&self) -> RwLockReadGuard<'_, ScanOpts> {
        self.inner.opts.read()
    }

    pub fn opts_mut(&self) -> RwLockWriteGuard<'_, ScanOpts> {
        self.inner.opts.write()
    }

    pub fn meta(&self) -> MutexGuard<'_, MetaObjset> {
        self.inner.meta.lock()
    }

    pub fn datasets(&self) -> MutexGuard<'_, DatasetLayer> {
        self.inner.datasets.lock()
    }

    pub fn ddt(&self) -> MutexGuard<'_, DedupTable> {
        self.inner.ddt.lock()
    }

    pub fn vdevs(&self) -> RwLockReadGuard<'_, VdevTree> {
        self.inner.vdevs.read()
    }

    pub fn vdevs_mut(&self) -> RwLockWriteGuard<'_, VdevTree> {
        self.inner.vdevs.write()
    }

    pub fn cache(&self) -> &BlockCache {
        &self.inner.cache
    }

    pub fn faults(&self) -> &FaultRegistry {
        &self.inner.faults
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.inner.events
    }

    pub fn space(&self) -> MutexGuard<'_, SpaceStats> {
        self.inner.space.lock()
    }

    pub fn root_bp(&self) -> BlockPointer {
        self.inner.root_bp.lock().clone()
    }

    pub fn set_root_bp(&self, bp: &BlockPointer) {
        *self.inner.root_bp.lock() = bp.clone();
    }

    // ---- txg machinery ----

    pub fn current_txg(&self) -> u64 {
        self.inner.txg.lock().current
    }

    /// Open the next txg; sync-context work runs under the returned
    /// handle.
    pub fn begin_txg(&self) -> Tx {
        let mut txg = self.inner.txg.lock();
        txg.current += 1;
        txg.sync_pass = 1;
        Tx {
            txg: txg.current,
            pass: 1,
        }
    }

    /// A further sync pass within the current txg.
    pub fn begin_pass(&self) -> Tx {
        let mut txg = self.inner.txg.lock();
        txg.sync_pass += 1;
        Tx {
            txg: txg.current,
            pass: txg.sync_pass,
        }
    }

    pub fn txg_sync_waiting(&self) -> bool {
        self.inner.txg.lock().sync_waiting
    }

    pub fn set_txg_sync_waiting(&self, waiting: bool) {
        self.inner.txg.lock().sync_waiting = waiting;
    }

    /// Run a checked mutation in sync context: the check gates the
    /// mutation atomically with respect to other sync work.
    pub fn sync_task_do<E>(
        &self,
        check: impl FnOnce(&Pool, &Tx) -> Result<(), E>,
        syncfn: impl FnOnce(&Pool, &Tx),
    ) -> Result<(), E> {
        let tx = self.begin_txg();
        check(self, &tx)?;
        syncfn(self, &tx);
        Ok(())
    }

    // ---- block store ----

    /// Place a block on a device; the fixture-facing write path.
    pub fn write_block(
        &self,
        vdev: u64,
        contents: BlockContents,
        checksum: u64,
        asize: u64,
    ) -> Result<Dva, CoreError> {
        let mut vdevs = self.vdevs_mut();
        Ok(vdevs
            .vdev_mut(vdev)?
            .alloc(Arc::new(contents), checksum, asize))
    }

    /// Read a block from its devices, verifying the checksum. Consulted by
    /// both the cache miss path and scrub reads.
    pub fn read_block(&self, bp: &BlockPointer) -> Result<Arc<BlockContents>, CoreError> {
        let id = bp.id().ok_or(CoreError::NoReplicas {})?;
        match self.faults().check(id) {
            Some(FaultKind::Io) => return Err(CoreError::IoFailed { block: id }),
            Some(FaultKind::Checksum) => {
                return Err(CoreError::ChecksumMismatch { block: id })
            }
            None => {}
        }
        let vdevs = self.vdevs();
        for dva in &bp.dvas {
            let vd = match vdevs.vdev(dva.vdev) {
                Ok(vd) => vd,
                Err(_) => continue,
            };
            if let Some(stored) = vd.read(dva.offset) {
                if stored.checksum != bp.checksum {
                    return Err(CoreError::ChecksumMismatch { block: id });
                }
                return Ok(stored.contents.clone());
            }
        }
        Err(CoreError::BlockNotFound { block: id })
    }

    /// Release every replica of `bp` back to its device.
    pub fn free_block(&self, bp: &BlockPointer, txg: u64) {
        trace!("freeing {} in txg {}", bp, txg);
        let mut vdevs = self.vdevs_mut();
        for dva in &bp.dvas {
            if let Ok(vd) = vdevs.vdev_mut(dva.vdev) {
                vd.free_dva(dva);
            }
        }
        drop(vdevs);
        if let Some(id) = bp.id() {
            self.cache().evict(id);
        }
    }

    /// Blocking read through the cache.
    pub fn read_wait(
        &self,
        bp: &BlockPointer,
        zb: &Bookmark,
    ) -> Result<Arc<BlockContents>, CoreError> {
        let id = bp.id().ok_or(CoreError::NoReplicas {})?;
        if let Some(contents) = self.cache().lookup(id) {
            return Ok(contents);
        }
        trace!("reading {} at {}", bp, zb);
        let contents = self.read_block(bp)?;
        self.cache().insert(id, contents.clone());
        Ok(contents)
    }

    /// Asynchronous cache warm-up under a parent I/O handle.
    pub fn read_prefetch(
        &self,
        pio: &Arc<crate::core::Zio>,
        bp: &BlockPointer,
        zb: &Bookmark,
    ) {
        let id = match bp.id() {
            Some(id) => id,
            None => return,
        };
        let pool = self.clone();
        self.cache().note_prefetch();
        pio.read_nowait(
            bp,
            crate::core::ZioPriority::AsyncRead,
            ZioFlags::CANFAIL,
            zb,
            move |result| {
                if let Ok(contents) = result {
                    pool.cache().insert(id, contents);
                }
            },
        );
    }

    // ---- scrub I/O accounting ----

    /// Admit one scrub read, waiting while the inflight limit is reached.
    pub fn scrub_admit(&self) {
        let max = self.opts().scrub_maxinflight.max(1);
        let mut state = self.inner.scrub.state.lock();
        while state.inflight >= max {
            self.inner.scrub.cv.wait(&mut state);
        }
        state.inflight += 1;
    }

    /// Issue an asynchronous scrub read of `bp`. Admission must have been
    /// granted already.
    pub fn scrub_read(&self, bp: &BlockPointer, flags: ZioFlags, zb: &Bookmark) {
        if self.opts().scrub_io_log {
            if let Some(id) = bp.id() {
                self.inner.scrub.state.lock().issued.push(IssuedIo {
                    zb: *zb,
                    block: id,
                    flags,
                });
            }
        }
        let pool = self.clone();
        let bp = bp.clone();
        let zb = *zb;
        runtime::spawn(async move {
            let result = pool.read_block(&bp);
            pool.scrub_io_done(result, flags, &zb);
        });
    }

    fn scrub_io_done(
        &self,
        result: Result<Arc<BlockContents>, CoreError>,
        flags: ZioFlags,
        zb: &Bookmark,
    ) {
        // expected checksum failures on intent log blocks stay silent
        let note = match &result {
            Err(err) if !(err.is_checksum() && flags.contains(ZioFlags::SPECULATIVE)) => {
                Some(format!("scrub error at {}: {}", zb, err))
            }
            _ => None,
        };
        {
            let mut state = self.inner.scrub.state.lock();
            state.inflight -= 1;
            if note.is_some() {
                state.pending_errors += 1;
            }
        }
        if let Some(note) = note {
            self.errlog_note(&note);
        }
        self.inner.scrub.cv.notify_all();
    }

    /// Wait for every outstanding scrub read to complete.
    pub fn scrub_drain(&self) {
        let mut state = self.inner.scrub.state.lock();
        while state.inflight > 0 {
            self.inner.scrub.cv.wait(&mut state);
        }
    }

    /// Collect errors accumulated by completed scrub reads.
    pub fn take_scrub_errors(&self) -> u64 {
        std::mem::take(&mut self.inner.scrub.state.lock().pending_errors)
    }

    pub fn scrub_inflight(&self) -> u64 {
        self.inner.scrub.state.lock().inflight
    }

    pub fn scrub_active(&self) -> bool {
        self.inner.scrub.state.lock().active
    }

    pub fn set_scrub_active(&self, active: bool) {
        self.inner.scrub.state.lock().active = active;
    }

    pub fn scrub_started(&self) -> bool {
        self.inner.scrub.state.lock().started
    }

    pub fn set_scrub_started(&self, started: bool) {
        self.inner.scrub.state.lock().started = started;
    }

    /// Reset the per-pass scan statistics.
    pub fn scan_stat_init(&self) {
        let mut state = self.inner.scrub.state.lock();
        state.pass_start = Utc::now().timestamp() as u64;
        state.pass_exam = 0;
    }

    pub fn scrub_pass_exam_add(&self, bytes: u64) {
        self.inner.scrub.state.lock().pass_exam += bytes;
    }

    pub fn scrub_pass_stats(&self) -> (u64, u64) {
        let state = self.inner.scrub.state.lock();
        (state.pass_start, state.pass_exam)
    }

    /// The issued-I/O log collected when `scrub_io_log` is on.
    pub fn scrub_io_history(&self) -> Vec<IssuedIo> {
        self.inner.scrub.state.lock().issued.clone()
    }

    pub fn clear_scrub_io_history(&self) {
        self.inner.scrub.state.lock().issued.clear();
    }

    // ---- events, history, error log ----

    pub fn notify_event(&self, action: EventAction) {
        info!("pool {}: event {:?}", self.name(), action);
        self.inner.events.notify(&self.inner.name, action);
    }

    pub fn history_log(&self, kind: HistoryKind, txg: u64, detail: String) {
        self.inner.history.lock().push(HistoryEntry {
            kind,
            txg,
            detail,
        });
    }

    pub fn history(&self) -> Vec<HistoryEntry> {
        self.inner.history.lock().clone()
    }

    pub fn errlog_note(&self, msg: &str) {
        self.inner.errlog.lock().current.push(msg.to_string());
    }

    /// Rotate the error log: the scrub that just ended becomes "last".
    pub fn errlog_rotate(&self) {
        let mut logs = self.inner.errlog.lock();
        logs.last = std::mem::take(&mut logs.current);
    }

    pub fn errlog_current(&self) -> Vec<String> {
        self.inner.errlog.lock().current.clone()
    }

    pub fn errlog_last(&self) -> Vec<String> {
        self.inner.errlog.lock().last.clone()
    }

    /// Raise a maintenance request; already-pending requests coalesce.
    pub fn async_request(&self, req: AsyncRequest) {
        self.inner.async_reqs.raise(req);
    }

    pub fn take_async_request(&self) -> Option<AsyncRequest> {
        self.inner.async_reqs.take()
    }

    // ---- scan surface ----

    /// Load persisted scan state on pool import.
    pub fn scan_init(&self, txg: u64) -> Result<(), ScanError> {
        let mut scan = self.inner.scan.lock();
        scan.init(self, txg)
    }

    /// Drop in-memory scan state on pool export.
    pub fn scan_fini(&self) {
        *self.inner.scan.lock() = ScanJob::new();
    }

    /// Kick off a new scan. Purges device caches and reprobes every device
    /// before entering sync context.
    pub fn scan_start(&self, func: ScanFunc) -> Result<(), ScanError> {
        self.cache().purge();
        self.inner.scrub_reopen.store(true, Ordering::SeqCst);
        self.vdevs_mut().reopen();
        self.inner.scrub_reopen.store(false, Ordering::SeqCst);

        self.sync_task_do(
            |pool, _tx| pool.inner.scan.lock().setup_check(),
            |pool, tx| pool.inner.scan.lock().setup_sync(pool, func, tx),
        )
    }

    /// Cancel the scan in progress, if any.
    pub fn scan_cancel(&self) -> Result<(), ScanError> {
        self.sync_task_do(
            |pool, _tx| pool.inner.scan.lock().cancel_check(),
            |pool, tx| {
                let mut scan = pool.inner.scan.lock();
                scan.done(pool, false, tx);
                scan.sync_state(pool, tx);
            },
        )
    }

    /// The per-txg scan driver; called once per sync pass.
    pub fn scan_sync(&self, tx: &Tx) {
        let mut scan = self.inner.scan.lock();
        scan.sync(self, tx);
    }

    pub fn scan_active(&self) -> bool {
        self.inner.scan.lock().active(self)
    }

    pub fn scan_resilvering(&self) -> bool {
        self.inner.scan.lock().resilvering()
    }

    /// Schedule a scan restart at `txg` (or the next txg when zero).
    pub fn restart_resilver(&self, txg: u64) {
        let mut scan = self.inner.scan.lock();
        scan.restart_resilver(self, txg);
    }

    pub fn scan_status(&self) -> ScanStatus {
        self.inner.scan.lock().status(self)
    }

    /// Snapshot of the persisted scan record.
    pub fn scan_record(&self) -> ScanRecord {
        self.inner.scan.lock().record().clone()
    }

    // ---- dataset lifecycle, observed by the scan ----

    /// Destroy a dataset. The scan adjusts its bookmark/queue first, then
    /// the layer drops the dataset and relinks the snapshot chain.
    pub fn destroy_dataset(&self, dsobj: u64, tx: &Tx) -> Result<(), CoreError> {
        let ds = self.datasets().hold(dsobj)?;
        self.inner.scan.lock().ds_destroyed(self, &ds, tx);
        {
            let mut layer = self.datasets();
            layer.remove(dsobj);
            if ds.is_snapshot {
                if let Some(prev) = layer.get_mut(ds.prev_snap_obj) {
                    if prev.next_snap_obj == dsobj {
                        prev.next_snap_obj = ds.next_snap_obj;
                    }
                }
                if let Some(next) = layer.get_mut(ds.next_snap_obj) {
                    next.prev_snap_obj = ds.prev_snap_obj;
                    next.prev_snap_txg = ds.prev_snap_txg;
                }
            }
        }
        // a destroyed snapshot's slot in its origin's clone list passes to
        // its successor
        if ds.origin_obj != 0 {
            if let Ok(origin) = self.datasets().hold(ds.origin_obj) {
                if origin.next_clones_obj != 0 {
                    let mut meta = self.meta();
                    if meta.kv.lookup_int_key(origin.next_clones_obj, dsobj).is_ok() {
                        let _ = meta.kv.remove_int(origin.next_clones_obj, dsobj);
                        if ds.next_snap_obj != 0 {
                            let _ = meta
                                .kv
                                .add_int_key(origin.next_clones_obj, ds.next_snap_obj, 0);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Snapshot a head dataset; the new snapshot slots in as the head's
    /// previous snapshot and inherits its place in clone lists.
    pub fn snapshot_dataset(
        &self,
        head_obj: u64,
        name: &str,
        tx: &Tx,
    ) -> Result<u64, CoreError> {
        let head = self.datasets().hold(head_obj)?;
        let snap_obj = self.meta().alloc_object();

        let mut snap = DatasetPhys::new(snap_obj, name, head.root_bp.clone(), tx.txg);
        snap.is_snapshot = true;
        snap.prev_snap_obj = head.prev_snap_obj;
        snap.prev_snap_txg = head.prev_snap_txg;
        snap.next_snap_obj = head_obj;
        snap.origin_obj = head.origin_obj;

        {
            let mut layer = self.datasets();
            // only relink a linear chain; a clone's origin keeps its own
            // successor
            if let Some(prev) = layer.get_mut(head.prev_snap_obj) {
                if prev.next_snap_obj == head_obj {
                    prev.next_snap_obj = snap_obj;
                }
            }
            layer.insert(snap);
            if let Some(head_mut) = layer.get_mut(head_obj) {
                head_mut.prev_snap_obj = snap_obj;
                head_mut.prev_snap_txg = tx.txg;
            }
        }

        // the head's slot in its origin's clone list passes to the snapshot
        if head.origin_obj != 0 {
            if let Ok(origin) = self.datasets().hold(head.origin_obj) {
                if origin.next_clones_obj != 0 {
                    let mut meta = self.meta();
                    if meta.kv.lookup_int_key(origin.next_clones_obj, head_obj).is_ok() {
                        let _ = meta.kv.remove_int(origin.next_clones_obj, head_obj);
                        let _ = meta.kv.add_int_key(origin.next_clones_obj, snap_obj, 0);
                    }
                }
            }
        }

        let head_now = self.datasets().hold(head_obj)?;
        self.inner.scan.lock().ds_snapshotted(self, &head_now, tx);
        Ok(snap_obj)
    }

    /// Swap the contents of a clone and its origin head; the scan swaps
    /// any references it holds to either.
    pub fn clone_swap(&self, obj1: u64, obj2: u64, tx: &Tx) -> Result<(), CoreError> {
        let ds1 = self.datasets().hold(obj1)?;
        let ds2 = self.datasets().hold(obj2)?;
        {
            let mut layer = self.datasets();
            if let Some(d1) = layer.get_mut(obj1) {
                d1.root_bp = ds2.root_bp.clone();
            }
            if let Some(d2) = layer.get_mut(obj2) {
                d2.root_bp = ds1.root_bp.clone();
            }
        }
        self.inner
            .scan
            .lock()
            .ds_clone_swapped(self, &ds1, &ds2, tx);
        Ok(())
    }

    /// Apply pending dedup reference changes; entries whose class rose are
    /// handed to the scan right away.
    pub fn ddt_sync(&self, tx: &Tx) {
        let promoted = self.ddt().apply_pending();
        if promoted.is_empty() {
            return;
        }
        let mut scan = self.inner.scan.lock();
        for (checksum_fn, entry) in promoted {
            scan.ddt_entry(self, checksum_fn, &entry, tx);
        }
    }
}
