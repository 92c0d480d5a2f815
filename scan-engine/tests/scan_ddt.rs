//! Dedup interaction: the pre-pass covers multiply-referenced blocks
//! exactly once, the tree walk skips them, and a reference class rising
//! mid-scan gets the block scrubbed through the table sync.

pub mod common;

use common::{pausing_opts, test_opts, Fixture};
use scan_engine::{
    core::{BlockPointer, DdtEntry, DdtPhys},
    scan::{ScanFunc, ScanState},
};

/// Register `bp` in the dedup table with the given reference count and
/// mark the tree copy as deduplicated.
fn dedup(fx: &Fixture, bp: &mut BlockPointer, refcnt: u64) {
    bp.dedup = true;
    let phys = DdtPhys {
        dvas: bp.dvas.clone(),
        phys_birth: bp.birth_txg,
        refcnt,
        lsize: bp.lsize,
        psize: bp.psize,
    };
    fx.pool.ddt().insert(0, DdtEntry::new(bp.checksum, phys));
}

fn issued_count(fx: &Fixture, bp: &BlockPointer) -> usize {
    let id = bp.id().unwrap();
    fx.pool
        .scrub_io_history()
        .iter()
        .filter(|io| io.block == id)
        .count()
}

#[test]
fn duplicate_blocks_are_scrubbed_once_by_the_prepass() {
    let mut fx = Fixture::new(test_opts(), 1);
    fx.init_mos();
    fx.init_origin();

    let mut dup = fx.data_block(0, 5);
    dedup(&fx, &mut dup, 3);
    let plain = fx.data_block(0, 5);
    let fs_bp = fx.objset_from(&[dup.clone(), plain.clone()], 8);
    fx.add_fs("data", fs_bp, 3);
    fx.advance_to_txg(10);

    fx.pool.scan_start(ScanFunc::Scrub).unwrap();
    fx.run_to_completion(50);

    assert_eq!(fx.pool.scan_record().state, ScanState::Finished);
    // the deduped block went through the pre-pass only; the tree walk
    // skipped it
    assert_eq!(issued_count(&fx, &dup), 1);
    assert_eq!(issued_count(&fx, &plain), 1);
}

#[test]
fn unique_blocks_are_left_to_the_tree_walk() {
    let mut fx = Fixture::new(test_opts(), 1);
    fx.init_mos();
    fx.init_origin();

    let mut unique = fx.data_block(0, 5);
    dedup(&fx, &mut unique, 1);
    let fs_bp = fx.objset_from(&[unique.clone()], 8);
    fx.add_fs("data", fs_bp, 3);
    fx.advance_to_txg(10);

    fx.pool.scan_start(ScanFunc::Scrub).unwrap();
    fx.run_to_completion(50);

    // unique entries are outside the covered classes: scrubbed by the
    // traversal, once
    assert_eq!(issued_count(&fx, &unique), 1);
}

#[test]
fn refclass_rise_mid_scan_scrubs_immediately_and_only_once() {
    let mut fx = Fixture::new(pausing_opts(), 1);
    fx.init_mos();
    fx.init_origin();

    // twenty plain blocks in front, the dedup candidate last, so the
    // paused traversal reliably has not reached it yet
    let mut bps: Vec<_> = (0..20).map(|_| fx.data_block(0, 5)).collect();
    let mut riser = fx.data_block(0, 5);
    dedup(&fx, &mut riser, 1);
    bps.push(riser.clone());
    let fs_bp = fx.objset_from(&bps, 8);
    fx.add_fs("data", fs_bp, 3);
    fx.advance_to_txg(10);

    fx.pool.set_txg_sync_waiting(true);
    fx.pool.scan_start(ScanFunc::Scrub).unwrap();

    // a few paused txgs: the pre-pass (which skips the unique entry) is
    // done, the tree walk is parked well before the riser
    for _ in 0..4 {
        fx.sync_once();
    }
    assert_eq!(fx.pool.scan_record().state, ScanState::Scanning);
    assert_eq!(issued_count(&fx, &riser), 0);

    // another reference arrives: unique -> duplicate while scanning
    fx.pool.ddt().bump_ref(0, riser.checksum, 2);
    let tx = fx.pool.begin_txg();
    fx.pool.ddt_sync(&tx);

    // the promotion scrubbed it right away
    assert_eq!(issued_count(&fx, &riser), 1);

    fx.pool.set_txg_sync_waiting(false);
    fx.run_to_completion(200);
    assert_eq!(fx.pool.scan_record().state, ScanState::Finished);

    // the tree walk skipped it: one scrub in total
    assert_eq!(issued_count(&fx, &riser), 1);
}

#[test]
fn prepass_pauses_and_resumes_through_its_cursor() {
    let mut fx = Fixture::new(pausing_opts(), 1);
    fx.init_mos();
    fx.init_origin();

    // several duplicate entries so the pre-pass spans txgs
    let mut bps = Vec::new();
    for _ in 0..6 {
        let mut bp = fx.data_block(0, 5);
        dedup(&fx, &mut bp, 2);
        bps.push(bp);
    }
    let fs_bp = fx.objset_from(&bps, 8);
    fx.add_fs("data", fs_bp, 3);
    fx.advance_to_txg(10);

    fx.pool.set_txg_sync_waiting(true);
    fx.pool.scan_start(ScanFunc::Scrub).unwrap();
    fx.sync_once();

    // the pre-pass made progress and persisted a cursor
    let ddb = fx.pool.scan_record().ddt_bookmark;
    assert!(ddb.cursor > 0 || ddb.class > 0);

    fx.pool.set_txg_sync_waiting(false);
    fx.run_to_completion(200);

    // each deduped block was scrubbed exactly once in the end
    for bp in &bps {
        assert_eq!(issued_count(&fx, bp), 1, "block {:?}", bp.id());
    }
}
