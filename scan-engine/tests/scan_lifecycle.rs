//! Dataset lifecycle events landing mid-scan: destroying the snapshot
//! under traversal, snapshotting a dataset the scan references, and
//! clone swaps, each adjusting the bookmark or the work queue.

pub mod common;

use common::{issued_ids, pausing_opts, Fixture};
use scan_engine::{
    core::BlockPointer,
    scan::{ScanFunc, ScanState},
};

/// A filesystem with one snapshot: the snapshot holds the first ten data
/// blocks, the head shares them and adds six more (written after the
/// snapshot), with its metadata rewritten copy-on-write style.
struct SnapPool {
    fx: Fixture,
    snap: u64,
    fs: u64,
    shared: Vec<BlockPointer>,
    fresh: Vec<BlockPointer>,
}

fn snap_pool() -> SnapPool {
    let mut fx = Fixture::new(pausing_opts(), 1);
    fx.init_mos();
    fx.init_origin();

    let shared: Vec<_> = (0..10).map(|_| fx.data_block(0, 3)).collect();
    let snap_root = fx.objset_from(&shared, 4);
    let fs = fx.add_fs("data", snap_root.clone(), 2);

    // snapshot at txg 5
    fx.advance_to_txg(4);
    let tx = fx.pool.begin_txg();
    let snap = fx.pool.snapshot_dataset(fs, "data@snap", &tx).unwrap();

    // head moves on: new data at txg 6, metadata rewritten at txg 7
    let fresh: Vec<_> = (0..6).map(|_| fx.data_block(0, 6)).collect();
    let mut all = shared.clone();
    all.extend(fresh.iter().cloned());
    let head_root = fx.objset_from(&all, 7);
    fx.pool.datasets().get_mut(fs).unwrap().root_bp = head_root;

    fx.advance_to_txg(10);
    SnapPool {
        fx,
        snap,
        fs,
        shared,
        fresh,
    }
}

/// Pause the scan until its bookmark sits inside `dsobj`.
fn pause_inside(fx: &Fixture, dsobj: u64, max_txgs: u64) {
    fx.pool.set_txg_sync_waiting(true);
    for _ in 0..max_txgs {
        if fx.pool.scan_record().bookmark.objset == dsobj {
            return;
        }
        fx.sync_once();
    }
    panic!("scan never paused inside dataset {}", dsobj);
}

#[test]
fn destroying_the_snapshot_under_traversal_moves_to_its_successor() {
    let SnapPool {
        fx,
        snap,
        fs,
        shared,
        fresh,
    } = snap_pool();

    fx.pool.scan_start(ScanFunc::Scrub).unwrap();
    pause_inside(&fx, snap, 100);

    // destroy the snapshot while the scan sits inside it
    let tx = fx.pool.begin_txg();
    fx.pool.destroy_dataset(snap, &tx).unwrap();

    // the bookmark moved to the successor, keeping its position
    let rec = fx.pool.scan_record();
    assert_eq!(rec.bookmark.objset, fs);

    fx.pool.set_txg_sync_waiting(false);
    let txgs = fx.run_to_completion(200);
    assert!(txgs >= 1);
    assert_eq!(fx.pool.scan_record().state, ScanState::Finished);

    // every block of the surviving head was covered
    let issued = issued_ids(&fx.pool);
    for bp in shared.iter().chain(fresh.iter()) {
        assert!(
            issued.contains(&bp.id().unwrap()),
            "block {:?} was missed",
            bp.id()
        );
    }
}

#[test]
fn destroying_a_queued_snapshot_hands_its_slot_to_the_successor() {
    let SnapPool { fx, snap, fs, .. } = snap_pool();

    fx.pool.scan_start(ScanFunc::Scrub).unwrap();
    let queue_obj = fx.pool.scan_record().queue_obj;

    // fabricate: the snapshot waits in the queue
    fx.pool.meta().kv.add_int_key(queue_obj, snap, 4).unwrap();

    let tx = fx.pool.begin_txg();
    fx.pool.destroy_dataset(snap, &tx).unwrap();

    // same mintxg, successor object
    let meta = fx.pool.meta();
    assert!(meta.kv.lookup_int_key(queue_obj, snap).is_err());
    assert_eq!(meta.kv.lookup_int_key(queue_obj, fs).unwrap(), 4);
}

#[test]
fn snapshotting_the_dataset_under_traversal_renames_the_bookmark() {
    let SnapPool { fx, fs, .. } = snap_pool();

    fx.pool.scan_start(ScanFunc::Scrub).unwrap();
    pause_inside(&fx, fs, 200);

    let tx = fx.pool.begin_txg();
    let new_snap = fx.pool.snapshot_dataset(fs, "data@mid", &tx).unwrap();

    assert_eq!(fx.pool.scan_record().bookmark.objset, new_snap);

    fx.pool.set_txg_sync_waiting(false);
    fx.run_to_completion(200);
    assert_eq!(fx.pool.scan_record().state, ScanState::Finished);
}

#[test]
fn clone_swap_switches_references_both_ways() {
    let SnapPool { fx, snap, fs, .. } = snap_pool();

    fx.pool.scan_start(ScanFunc::Scrub).unwrap();
    pause_inside(&fx, snap, 100);

    let tx = fx.pool.begin_txg();
    fx.pool.clone_swap(snap, fs, &tx).unwrap();
    assert_eq!(fx.pool.scan_record().bookmark.objset, fs);

    // swap back
    let tx = fx.pool.begin_txg();
    fx.pool.clone_swap(fs, snap, &tx).unwrap();
    assert_eq!(fx.pool.scan_record().bookmark.objset, snap);

    fx.pool.set_txg_sync_waiting(false);
    fx.run_to_completion(200);
    assert_eq!(fx.pool.scan_record().state, ScanState::Finished);
}

#[test]
fn clone_swap_keeps_both_queue_entries_when_both_are_queued() {
    let SnapPool { fx, snap, fs, .. } = snap_pool();

    fx.pool.scan_start(ScanFunc::Scrub).unwrap();
    let queue_obj = fx.pool.scan_record().queue_obj;
    {
        let mut meta = fx.pool.meta();
        meta.kv.add_int_key(queue_obj, snap, 4).unwrap();
        meta.kv.add_int_key(queue_obj, fs, 4).unwrap();
    }

    let tx = fx.pool.begin_txg();
    fx.pool.clone_swap(snap, fs, &tx).unwrap();

    let meta = fx.pool.meta();
    assert_eq!(meta.kv.lookup_int_key(queue_obj, snap).unwrap(), 4);
    assert_eq!(meta.kv.lookup_int_key(queue_obj, fs).unwrap(), 4);
}

#[test]
fn clone_swap_moves_a_single_queue_entry() {
    let SnapPool { fx, snap, fs, .. } = snap_pool();

    fx.pool.scan_start(ScanFunc::Scrub).unwrap();
    let queue_obj = fx.pool.scan_record().queue_obj;
    fx.pool.meta().kv.add_int_key(queue_obj, fs, 4).unwrap();

    let tx = fx.pool.begin_txg();
    fx.pool.clone_swap(snap, fs, &tx).unwrap();

    let meta = fx.pool.meta();
    assert!(meta.kv.lookup_int_key(queue_obj, fs).is_err());
    assert_eq!(meta.kv.lookup_int_key(queue_obj, snap).unwrap(), 4);
}
