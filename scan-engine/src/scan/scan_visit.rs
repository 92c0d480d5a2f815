use crate::{
    core::{
        bookmark_is_before,
        BlockKind,
        BlockPointer,
        Bookmark,
        DatasetPhys,
        DnodePhys,
        ObjsetKind,
        Pool,
        Tx,
        ZilHeader,
        ZilRecord,
        GROUPUSED_OBJECT,
        META_DNODE_OBJECT,
        META_OBJSET,
        SPILL_BLKID,
        USERUSED_OBJECT,
        ZIL_LEVEL,
        ZIL_OBJECT,
    },
    scan::{scan_error::Io, scan_record::ScanFunc, ScanError, ScanJob},
};

use snafu::ResultExt;

use crate::core::CoreError;

/// A block decoded to something its pointer's kind does not allow.
fn bad_contents(bp: &BlockPointer) -> ScanError {
    ScanError::Io {
        source: CoreError::InvalidContents {
            block: bp.id().unwrap_or((0, 0)),
        },
    }
}

impl ScanJob {
    /// Whether the txg's time budget is spent and the traversal should
    /// yield. Only fires at level-0 entries, never on accounting objects,
    /// and not while a resume is still seeking its bookmark. On pause the
    /// current position is written into the record.
    pub(super) fn check_pause(&mut self, pool: &Pool, zb: Option<&Bookmark>) -> bool {
        // we never skip user/group accounting objects
        if let Some(zb) = zb {
            if zb.is_accounting_object() {
                return false;
            }
        }

        if self.pausing {
            return true;
        }

        // still resuming from a prior pause
        if !self.record.bookmark.is_zero() {
            return false;
        }

        // we only know how to resume from level-0 blocks
        if let Some(zb) = zb {
            if zb.level != 0 {
                return false;
            }
        }

        let (timeout_ms, min_time_ms) = {
            let opts = pool.opts();
            let min = if self.record.func == ScanFunc::Resilver {
                opts.resilver_min_time_ms
            } else {
                opts.scan_min_time_ms
            };
            (opts.txg_timeout_ms, min)
        };
        let elapsed = self
            .sync_start
            .map(|t| t.elapsed())
            .unwrap_or_default();

        if elapsed.as_millis() as u64 > timeout_ms
            || (elapsed.as_micros() as u64 > min_time_ms * 1000 && pool.txg_sync_waiting())
            || pool.shutting_down()
        {
            if let Some(zb) = zb {
                debug!("pausing at bookmark {}", zb);
                self.record.bookmark = *zb;
            }
            debug!("pausing at dedup cursor {}", self.record.ddt_bookmark);
            self.pausing = true;
            return true;
        }
        false
    }

    /// Whether this subtree was wholly covered before the persisted
    /// bookmark and can be skipped. Clears the bookmark once the traversal
    /// reaches (or passes) it, re-arming the pause predicate.
    pub(super) fn check_resume(&mut self, dnp: Option<&DnodePhys>, zb: &Bookmark) -> bool {
        if self.record.bookmark.is_zero() || zb.is_accounting_object() {
            return false;
        }

        // already visited in a prior txg
        if bookmark_is_before(dnp, zb, &self.record.bookmark) {
            return true;
        }

        // found the resume point, or moved past it to a later object
        if *zb == self.record.bookmark || zb.object > self.record.bookmark.object {
            debug!("resuming at {}", zb);
            self.record.bookmark = Bookmark::default();
        }
        false
    }

    /// Visit the root block pointer of a dataset (or of the meta object
    /// set when `ds` is absent).
    pub(super) fn visit_rootbp(
        &mut self,
        pool: &Pool,
        ds: Option<&DatasetPhys>,
        bp: &BlockPointer,
        tx: &Tx,
    ) {
        let zb = Bookmark::root_of(ds.map_or(META_OBJSET, |d| d.object));
        self.visit_bp(pool, bp, &zb, None, ds, ObjsetKind::None, tx);
    }

    /// Visit one block pointer: run the pause and resume predicates,
    /// descend into children, and hand in-window blocks to the scan
    /// callback unless the dedup pre-pass already covered them.
    pub(super) fn visit_bp(
        &mut self,
        pool: &Pool,
        bp: &BlockPointer,
        zb: &Bookmark,
        dnp: Option<&DnodePhys>,
        ds: Option<&DatasetPhys>,
        ostype: ObjsetKind,
        tx: &Tx,
    ) {
        if self.check_pause(pool, Some(zb)) {
            return;
        }

        if self.check_resume(dnp, zb) {
            return;
        }

        if bp.is_hole() {
            return;
        }

        trace!(
            "visiting ds={} zb={} bp={}",
            ds.map_or(0, |d| d.object),
            zb,
            bp
        );

        if bp.birth_txg <= self.record.cur_min_txg {
            return;
        }

        if self.recurse(pool, ds, ostype, dnp, bp, zb, tx).is_err() {
            self.record.errors += 1;
            return;
        }

        // the dedup pre-pass already scrubbed blocks it covers
        if pool.ddt().class_contains(self.record.ddt_class_max, bp) {
            return;
        }

        // A block from after cur_max_txg belongs to a future snapshot
        // visited on a later pass of this dataset; skip it for now.
        if bp.birth_txg <= self.record.cur_max_txg {
            self.issue_scan_cb(pool, bp, zb);
        }
    }

    /// Descend into a block by kind: indirect blocks and dnode blocks
    /// recurse with prefetch, object set blocks fan out into their dnodes
    /// and intent log, accounting leaves are read and nothing more.
    fn recurse(
        &mut self,
        pool: &Pool,
        ds: Option<&DatasetPhys>,
        ostype: ObjsetKind,
        dnp: Option<&DnodePhys>,
        bp: &BlockPointer,
        zb: &Bookmark,
        tx: &Tx,
    ) -> Result<(), ScanError> {
        if bp.level > 0 {
            let buf = pool.read_wait(bp, zb).context(Io)?;
            let children = buf
                .as_indirect()
                .cloned()
                .ok_or_else(|| bad_contents(bp))?;
            let epb = children.len() as u64;
            for (i, cbp) in children.iter().enumerate() {
                self.prefetch(pool, cbp, zb.objset, zb.object, zb.blkid * epb + i as u64);
            }
            for (i, cbp) in children.iter().enumerate() {
                let czb = Bookmark::new(
                    zb.objset,
                    zb.object,
                    zb.level - 1,
                    zb.blkid * epb + i as u64,
                );
                self.visit_bp(pool, cbp, &czb, dnp, ds, ostype, tx);
            }
        } else if bp.kind == BlockKind::SpaceUsed {
            let _buf = pool.read_wait(bp, zb).context(Io)?;
        } else if bp.kind == BlockKind::DnodeBlock {
            let buf = pool.read_wait(bp, zb).context(Io)?;
            let dnodes = buf.as_dnodes().cloned().ok_or_else(|| bad_contents(bp))?;
            let epb = dnodes.len() as u64;
            for (i, cdnp) in dnodes.iter().enumerate() {
                for (j, cbp) in cdnp.blkptr.iter().enumerate() {
                    self.prefetch(
                        pool,
                        cbp,
                        zb.objset,
                        zb.blkid * epb + i as u64,
                        j as u64,
                    );
                }
            }
            for (i, cdnp) in dnodes.iter().enumerate() {
                // the object id is derived from the dnode block position
                self.visit_dnode(
                    pool,
                    ds,
                    ostype,
                    cdnp,
                    zb.objset,
                    zb.blkid * epb + i as u64,
                    tx,
                );
            }
        } else if bp.kind == BlockKind::Objset {
            let buf = pool.read_wait(bp, zb).context(Io)?;
            let osp = match buf.as_objset() {
                Some(osp) => osp.clone(),
                None => return Err(bad_contents(bp)),
            };

            if self.is_scrub_resilver() {
                self.visit_zil(pool, zb.objset, &osp.zil, tx);
            }

            self.visit_dnode(
                pool,
                ds,
                osp.kind,
                &osp.meta_dnode,
                zb.objset,
                META_DNODE_OBJECT,
                tx,
            );

            if osp.has_userused() {
                // Accounting objects are always visited, even when
                // pausing, so the space deltas of this txg get integrated.
                if let Some(group) = &osp.groupused_dnode {
                    self.visit_dnode(pool, ds, osp.kind, group, zb.objset, GROUPUSED_OBJECT, tx);
                }
                if let Some(user) = &osp.userused_dnode {
                    self.visit_dnode(pool, ds, osp.kind, user, zb.objset, USERUSED_OBJECT, tx);
                }
            }
        }

        Ok(())
    }

    /// Visit every block pointer of one dnode, and its spill block if it
    /// has one.
    pub(super) fn visit_dnode(
        &mut self,
        pool: &Pool,
        ds: Option<&DatasetPhys>,
        ostype: ObjsetKind,
        dnp: &DnodePhys,
        objset: u64,
        object: u64,
        tx: &Tx,
    ) {
        for (j, cbp) in dnp.blkptr.iter().enumerate() {
            let czb = Bookmark::new(objset, object, dnp.nlevels as i64 - 1, j as u64);
            self.visit_bp(pool, cbp, &czb, Some(dnp), ds, ostype, tx);
        }

        if let Some(spill) = &dnp.spill {
            let czb = Bookmark::new(objset, object, 0, SPILL_BLKID);
            self.visit_bp(pool, spill, &czb, Some(dnp), ds, ostype, tx);
        }
    }

    /// Warm the cache for a block about to be visited. Holes, blocks below
    /// the scan window and level-0 non-dnode blocks are not worth a read.
    fn prefetch(&mut self, pool: &Pool, bp: &BlockPointer, objset: u64, object: u64, blkid: u64) {
        if pool.opts().no_scrub_prefetch {
            return;
        }
        if bp.is_hole() || bp.birth_txg <= self.record.min_txg {
            return;
        }
        if bp.level == 0 && bp.kind != BlockKind::DnodeBlock {
            return;
        }

        let zb = Bookmark::new(objset, object, bp.level, blkid);
        if let Some(root) = self.io_root.clone() {
            pool.read_prefetch(&root, bp, &zb);
        }
    }

    /// Walk the intent log embedded in an object set. Blocks that have
    /// been claimed but not yet replayed are handed straight to the scan
    /// callback; so are the blocks referenced by write records.
    pub(super) fn visit_zil(&mut self, pool: &Pool, objset: u64, zh: &ZilHeader, _tx: &Tx) {
        let claim_txg = zh.claim_txg;

        // We only want to visit blocks that have been claimed but not yet
        // replayed (or, in read-only mode, blocks that would be claimed).
        if claim_txg == 0 && pool.writeable() {
            return;
        }

        for (i, zblk) in zh.blocks.iter().enumerate() {
            let seq = i as u64 + 1;
            self.zil_block(pool, objset, &zblk.bp, seq, claim_txg);
            for record in &zblk.records {
                if let ZilRecord::Write { object, offset, bp } = record {
                    self.zil_record(pool, objset, *object, *offset, bp, claim_txg);
                }
            }
        }
    }

    fn zil_block(&mut self, pool: &Pool, objset: u64, bp: &BlockPointer, seq: u64, claim_txg: u64) {
        if bp.birth_txg <= self.record.cur_min_txg {
            return;
        }

        // One block can have been allocated long ago without being
        // claimed; it is on disk, so visit it anyway.
        if claim_txg == 0 && bp.birth_txg >= pool.first_txg() {
            return;
        }

        let zb = Bookmark::new(objset, ZIL_OBJECT, ZIL_LEVEL, seq);
        self.issue_scan_cb(pool, bp, &zb);
    }

    fn zil_record(
        &mut self,
        pool: &Pool,
        objset: u64,
        object: u64,
        offset: u64,
        bp: &BlockPointer,
        claim_txg: u64,
    ) {
        if bp.birth_txg <= self.record.cur_min_txg {
            return;
        }

        // birth can predate the claim when the record's txg has already
        // synced while the log block holds later records too
        if claim_txg == 0 || bp.birth_txg < claim_txg {
            return;
        }

        let zb = Bookmark::new(objset, object, ZIL_LEVEL, offset / bp.lsize.max(1));
        self.issue_scan_cb(pool, bp, &zb);
    }
}
