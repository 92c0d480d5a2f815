//! Shared pool fixtures: builds in-memory pools with object trees shaped
//! the way the traversal expects them (copy-on-write birth ordering,
//! dnode blocks packed to the on-disk shift constants).

#![allow(dead_code)]

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use scan_engine::{
    core::{
        BlockContents,
        BlockId,
        BlockKind,
        BlockPointer,
        DatasetPhys,
        DnodePhys,
        ObjsetKind,
        ObjsetPhys,
        Pool,
        PoolBuilder,
        Tx,
        ZilHeader,
    },
    logger,
    scan::{ScanFunc, ScanState},
    subsys::ScanOpts,
};

/// Dnodes per dnode block; must agree with the on-disk shift constants
/// the bookmark ordering derives object ids from.
pub const DNODES_PER_BLOCK: usize = 32;
/// Children per indirect block of the meta dnode.
pub const META_EPB: usize = 8;

pub const DATA_ASIZE: u64 = 512;

/// One block the fixture placed, with everything a test needs to predict
/// the scan's behaviour.
#[derive(Debug, Clone)]
pub struct BlockRec {
    pub id: BlockId,
    pub birth: u64,
    pub asize: u64,
    /// A level-0 data leaf (as opposed to metadata).
    pub is_data: bool,
}

pub struct Fixture {
    pub pool: Pool,
    pub origin: u64,
    /// Every block placed through the fixture, in placement order.
    pub blocks: Vec<BlockRec>,
    next_checksum: u64,
}

impl Fixture {
    pub fn new(opts: ScanOpts, nvdevs: u64) -> Self {
        logger::init_logger("warn");
        let pool = PoolBuilder::new("tank")
            .with_opts(opts)
            .with_vdevs(nvdevs)
            .build();
        Self {
            pool,
            origin: 0,
            blocks: Vec::new(),
            next_checksum: 1,
        }
    }

    pub fn with_version(opts: ScanOpts, nvdevs: u64, version: u64) -> Self {
        logger::init_logger("warn");
        let pool = PoolBuilder::new("tank")
            .with_opts(opts)
            .with_vdevs(nvdevs)
            .with_version(version)
            .build();
        Self {
            pool,
            origin: 0,
            blocks: Vec::new(),
            next_checksum: 1,
        }
    }

    /// Place one block and return its pointer.
    pub fn write_bp(
        &mut self,
        vdev: u64,
        contents: BlockContents,
        kind: BlockKind,
        level: i64,
        birth: u64,
        asize: u64,
    ) -> BlockPointer {
        let checksum = self.next_checksum;
        self.next_checksum += 1;
        let dva = self
            .pool
            .write_block(vdev, contents, checksum, asize)
            .expect("fixture vdev exists");
        let bp = BlockPointer {
            dvas: vec![dva],
            lsize: asize * 8,
            psize: asize,
            birth_txg: birth,
            phys_birth: 0,
            checksum,
            kind,
            level,
            dedup: false,
        };
        self.blocks.push(BlockRec {
            id: bp.id().unwrap(),
            birth,
            asize,
            is_data: kind == BlockKind::Data && level == 0,
        });
        bp
    }

    /// Write one level-0 data block.
    pub fn data_block(&mut self, vdev: u64, birth: u64) -> BlockPointer {
        self.write_bp(
            vdev,
            BlockContents::Payload(vec![0u8; 64]),
            BlockKind::Data,
            0,
            birth,
            DATA_ASIZE,
        )
    }

    /// Pack pre-written data block pointers into a fresh object set tree:
    /// one dnode per data block, dnode blocks of `DNODES_PER_BLOCK`, the
    /// meta dnode fanning out through level-1 indirect blocks. Metadata
    /// births follow copy-on-write rules (a parent is at least as new as
    /// its children, and at least `meta_birth`).
    pub fn objset_from(&mut self, data: &[BlockPointer], meta_birth: u64) -> BlockPointer {
        self.objset_from_full(data, meta_birth, ObjsetKind::Filesystem, ZilHeader::default())
    }

    pub fn objset_from_full(
        &mut self,
        data: &[BlockPointer],
        meta_birth: u64,
        kind: ObjsetKind,
        zil: ZilHeader,
    ) -> BlockPointer {
        // object 0 is the meta dnode itself; keep it as an empty filler so
        // derived object ids start at 1
        let mut dnodes = vec![DnodePhys::new(1, 10, 4096)];
        for bp in data {
            let mut dn = DnodePhys::new(1, 10, 4096);
            dn.blkptr = vec![bp.clone()];
            dnodes.push(dn);
        }

        let mut dnode_bps = Vec::new();
        for chunk in dnodes.chunks(DNODES_PER_BLOCK) {
            let birth = chunk
                .iter()
                .flat_map(|dn| dn.blkptr.iter())
                .map(|bp| bp.birth_txg)
                .max()
                .unwrap_or(meta_birth)
                .max(meta_birth);
            let bp = self.write_bp(
                0,
                BlockContents::Dnodes(chunk.to_vec()),
                BlockKind::DnodeBlock,
                0,
                birth,
                1024,
            );
            dnode_bps.push(bp);
        }

        let mut meta_dnode = DnodePhys::new(
            2,
            10,
            (DNODES_PER_BLOCK as u32) << 9,
        );
        if dnode_bps.is_empty() {
            meta_dnode.nlevels = 1;
        } else {
            for chunk in dnode_bps.chunks(META_EPB) {
                let birth = chunk.iter().map(|bp| bp.birth_txg).max().unwrap();
                let bp = self.write_bp(
                    0,
                    BlockContents::Indirect(chunk.to_vec()),
                    BlockKind::DnodeBlock,
                    1,
                    birth,
                    1024,
                );
                meta_dnode.blkptr.push(bp);
            }
        }

        let mut osp = ObjsetPhys::new(kind, meta_dnode);
        osp.zil = zil;
        let birth = osp
            .meta_dnode
            .blkptr
            .iter()
            .map(|bp| bp.birth_txg)
            .max()
            .unwrap_or(meta_birth)
            .max(meta_birth);
        self.write_bp(
            0,
            BlockContents::Objset(Box::new(osp)),
            BlockKind::Objset,
            0,
            birth,
            2048,
        )
    }

    /// Set up the meta object set root.
    pub fn init_mos(&mut self) {
        let bp = self.objset_from_full(&[], 2, ObjsetKind::Meta, ZilHeader::default());
        self.pool.meta().set_root_bp(bp);
    }

    /// Create the origin snapshot the modern traversal starts from.
    pub fn init_origin(&mut self) {
        let bp = self.objset_from_full(&[], 1, ObjsetKind::Filesystem, ZilHeader::default());
        let obj = self.pool.meta().alloc_object();
        let mut ds = DatasetPhys::new(obj, "origin", bp, 1);
        ds.is_snapshot = true;
        self.pool.datasets().insert(ds);
        self.pool.datasets().origin_snap = obj;
        self.origin = obj;
    }

    /// Create a filesystem cloned from the origin snapshot, keeping the
    /// origin's child count and clone list in step.
    pub fn add_fs(&mut self, name: &str, root_bp: BlockPointer, creation_txg: u64) -> u64 {
        let origin_obj = self.origin;
        let origin = self
            .pool
            .datasets()
            .hold(origin_obj)
            .expect("origin exists");

        let obj = self.pool.meta().alloc_object();
        let mut ds = DatasetPhys::new(obj, name, root_bp, creation_txg);
        ds.prev_snap_obj = origin_obj;
        ds.prev_snap_txg = origin.creation_txg;
        ds.origin_obj = origin_obj;
        self.pool.datasets().insert(ds);

        let clones_obj = if origin.next_clones_obj == 0 {
            let id = self.pool.meta().alloc_object();
            self.pool.meta().kv.create(id);
            self.pool
                .datasets()
                .get_mut(origin_obj)
                .expect("origin exists")
                .next_clones_obj = id;
            id
        } else {
            origin.next_clones_obj
        };
        self.pool
            .meta()
            .kv
            .add_int_key(clones_obj, obj, 0)
            .expect("filesystem not yet a clone");
        self.pool
            .datasets()
            .get_mut(origin_obj)
            .expect("origin exists")
            .num_children += 1;

        obj
    }

    /// A filesystem with a linear snapshot chain but no origin, for pools
    /// predating the origin-rooted traversal.
    pub fn add_standalone_fs(
        &mut self,
        name: &str,
        root_bp: BlockPointer,
        creation_txg: u64,
    ) -> u64 {
        let obj = self.pool.meta().alloc_object();
        let ds = DatasetPhys::new(obj, name, root_bp, creation_txg);
        self.pool.datasets().insert(ds);
        obj
    }

    /// Advance the pool's open txg to at least `txg`.
    pub fn advance_to_txg(&self, txg: u64) {
        while self.pool.current_txg() < txg {
            self.pool.begin_txg();
        }
    }

    /// Drive scan syncs until neither a scan nor deferred frees remain,
    /// returning the number of txgs used.
    pub fn run_to_completion(&self, max_txgs: u64) -> u64 {
        let mut used = 0;
        while self.pool.scan_record().state == ScanState::Scanning || self.pool.scan_active() {
            assert!(used < max_txgs, "scan did not complete in {} txgs", max_txgs);
            let tx = self.pool.begin_txg();
            self.pool.scan_sync(&tx);
            used += 1;
        }
        used
    }

    /// One scan sync in a fresh txg.
    pub fn sync_once(&self) -> Tx {
        let tx = self.pool.begin_txg();
        self.pool.scan_sync(&tx);
        tx
    }

    /// Ids of every placed block born inside `(min_txg, max_txg)`.
    pub fn ids_born_within(&self, min_txg: u64, max_txg: u64) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.birth > min_txg && b.birth < max_txg)
            .map(|b| b.id)
            .collect()
    }

    pub fn data_ids(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.is_data)
            .map(|b| b.id)
            .collect()
    }

    pub fn all_ids(&self) -> Vec<BlockId> {
        self.blocks.iter().map(|b| b.id).collect()
    }
}

/// Deterministically shuffled birth txgs in `[lo, hi]` for stress shapes.
pub fn shuffled_births(n: usize, lo: u64, hi: u64, seed: u64) -> Vec<u64> {
    let span = hi - lo + 1;
    let mut births: Vec<u64> = (0..n).map(|i| lo + (i as u64 % span)).collect();
    births.shuffle(&mut StdRng::seed_from_u64(seed));
    births
}

/// Sorted unique block ids issued to scrub reads.
pub fn issued_ids(pool: &Pool) -> Vec<BlockId> {
    let mut ids: Vec<BlockId> = pool.scrub_io_history().iter().map(|io| io.block).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// How many times each id in `ids` was issued.
pub fn issue_counts(pool: &Pool, ids: &[BlockId]) -> Vec<(BlockId, usize)> {
    let history = pool.scrub_io_history();
    ids.iter()
        .map(|id| (*id, history.iter().filter(|io| io.block == *id).count()))
        .collect()
}

pub fn sorted(mut ids: Vec<BlockId>) -> Vec<BlockId> {
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Options tuned for tests: tiny pools, full issued-I/O logging.
pub fn test_opts() -> ScanOpts {
    let mut opts = ScanOpts::default();
    opts.scrub_io_log = true;
    opts
}

/// Options that make the pause predicate fire at every level-0 entry once
/// a sync is waiting.
pub fn pausing_opts() -> ScanOpts {
    let mut opts = test_opts();
    opts.scan_min_time_ms = 0;
    opts.resilver_min_time_ms = 0;
    opts
}

pub fn assert_finished(pool: &Pool, func: ScanFunc) {
    let rec = pool.scan_record();
    assert_eq!(rec.state, ScanState::Finished);
    assert_eq!(rec.func, func);
    assert!(rec.end_time >= rec.start_time);
}
