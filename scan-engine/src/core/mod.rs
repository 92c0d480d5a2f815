//!
//! core contains the storage primitives the scan engine operates on: block
//! pointers and their on-device store, the device tree with its dirty-txg
//! lists, the meta object set (pool directory, key/value objects, deferred
//! free list), the dataset layer, the dedup table and the I/O pipeline.

use snafu::Snafu;

pub use block::{
    BlockId,
    BlockKind,
    BlockPointer,
    Dva,
    BLKPTR_SHIFT,
    BLOCK_KINDS,
    DNODE_BLOCK_SHIFT,
    DNODE_SHIFT,
    MIN_BLOCK_SHIFT,
};
pub use bookmark::{
    bookmark_is_before,
    Bookmark,
    DEADLIST_OBJECT,
    DESTROYED_OBJSET,
    GROUPUSED_OBJECT,
    META_DNODE_OBJECT,
    META_OBJSET,
    ROOT_BLKID,
    ROOT_LEVEL,
    ROOT_OBJECT,
    SPILL_BLKID,
    USERUSED_OBJECT,
    ZIL_LEVEL,
    ZIL_OBJECT,
};
pub use cache::BlockCache;
pub use dataset::{DatasetLayer, DatasetPhys};
pub use ddt::{DdtBookmark, DdtClass, DdtEntry, DdtKey, DdtPhys, DedupTable, RefDelta, CHECKSUM_FNS, DDT_PHYS_TYPES};
pub use fault_injection::{FaultKind, FaultRegistry, Injection};
pub use kv::KvStore;
pub use meta::{FreeList, MetaObjset, DIRECTORY_OBJECT, DIR_SCAN, LEGACY_SCRUB_NAMES};
pub use objset::{BlockContents, DnodePhys, ObjsetKind, ObjsetPhys, ZilBlock, ZilHeader, ZilRecord};
pub use pool::{AsyncRequest, HistoryEntry, HistoryKind, IssuedIo, Pool, PoolBuilder, SpaceStats};
pub use txg::{Tx, TxgState, TXG_INITIAL};
pub use vdev::{DtlKind, RangeList, StoredBlock, Vdev, VdevTree, DTL_KINDS};
pub use zio::{Zio, ZioFlags, ZioPriority};

mod block;
mod bookmark;
mod cache;
mod dataset;
mod ddt;
pub mod fault_injection;
mod kv;
mod meta;
mod objset;
mod pool;
pub mod runtime;
mod txg;
mod vdev;
mod zio;

/// Pool format versions gating engine behaviour.
pub const VERSION_SCAN_QUEUE: u64 = 11;
/// Deferred frees are kept in a persistent block-pointer list from this
/// version onwards.
pub const VERSION_DEADLISTS: u64 = 23;
/// Version introducing the unified scan state record.
pub const VERSION_SCAN: u64 = 25;
/// Current format written by this software.
pub const VERSION_CURRENT: u64 = VERSION_SCAN;

/// Obtain the full error chain.
pub trait VerboseError {
    fn verbose(&self) -> String;
}

impl<T> VerboseError for T
where
    T: std::error::Error,
{
    /// Loops through the error chain, formatting each source error on the
    /// way down.
    fn verbose(&self) -> String {
        let mut msg = format!("{}", self);
        let mut opt_source = self.source();
        while let Some(source) = opt_source {
            msg = format!("{}: {}", msg, source);
            opt_source = source.source();
        }
        msg
    }
}

/// Errors raised by the storage primitives.
#[derive(Debug, Snafu, Clone, PartialEq)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum CoreError {
    #[snafu(display("block {:?} is not present on any device", block))]
    BlockNotFound { block: BlockId },
    #[snafu(display("checksum mismatch reading block {:?}", block))]
    ChecksumMismatch { block: BlockId },
    #[snafu(display("injected I/O failure on block {:?}", block))]
    IoFailed { block: BlockId },
    #[snafu(display("block {:?} holds unexpected contents", block))]
    InvalidContents { block: BlockId },
    #[snafu(display("block pointer has no replicas"))]
    NoReplicas {},
    #[snafu(display("no such object {}", object))]
    ObjectNotFound { object: u64 },
    #[snafu(display("entry {} already exists", key))]
    EntryExists { key: String },
    #[snafu(display("no such entry {}", key))]
    EntryNotFound { key: String },
    #[snafu(display("dataset {} not found", dsobj))]
    DatasetNotFound { dsobj: u64 },
    #[snafu(display("device {} not found", vdev))]
    VdevNotFound { vdev: u64 },
}

impl CoreError {
    /// True for a checksum verification failure, which scrub treats
    /// differently on speculative (intent log) reads.
    pub fn is_checksum(&self) -> bool {
        matches!(self, CoreError::ChecksumMismatch { .. })
    }
}
