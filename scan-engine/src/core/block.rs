use std::fmt;

/// log2 of the size of a block pointer on disk.
pub const BLKPTR_SHIFT: u32 = 7;
/// log2 of the size of a dnode on disk.
pub const DNODE_SHIFT: u32 = 9;
/// log2 of the size of a dnode block.
pub const DNODE_BLOCK_SHIFT: u32 = 14;
/// log2 of the smallest allocation unit, in bytes.
pub const MIN_BLOCK_SHIFT: u32 = 9;

/// One replica of a block: the device it lives on, its byte offset there
/// and the size allocated for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dva {
    pub vdev: u64,
    pub offset: u64,
    pub asize: u64,
    /// Gang header: the replica fans out into member blocks which may live
    /// on other devices.
    pub gang: bool,
}

impl Dva {
    pub fn new(vdev: u64, offset: u64, asize: u64) -> Self {
        Self {
            vdev,
            offset,
            asize,
            gang: false,
        }
    }
}

/// Identity of a stored block: device and offset of its first replica.
pub type BlockId = (u64, u64);

/// Content tag of a block pointer. The recursor matches on this once per
/// block to decide how to descend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Plain file/volume data; leaves are not read by the traversal itself.
    Data,
    /// A block packed with dnodes.
    DnodeBlock,
    /// An object set header block.
    Objset,
    /// User/group space accounting leaf.
    SpaceUsed,
    /// Intent log block.
    IntentLog,
    /// Key/value data block.
    KvData,
}

/// Number of distinct block kinds, used to size statistics tables.
pub const BLOCK_KINDS: usize = 6;

impl BlockKind {
    /// Stable index for statistics tables.
    pub fn index(&self) -> usize {
        match self {
            BlockKind::Data => 0,
            BlockKind::DnodeBlock => 1,
            BlockKind::Objset => 2,
            BlockKind::SpaceUsed => 3,
            BlockKind::IntentLog => 4,
            BlockKind::KvData => 5,
        }
    }
}

/// Descriptor of one block: up to three replicas, logical and physical
/// sizes, birth txgs, checksum, content tag and indirection level.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockPointer {
    pub dvas: Vec<Dva>,
    pub lsize: u64,
    pub psize: u64,
    /// Txg this block pointer was born in; zero marks a hole.
    pub birth_txg: u64,
    /// Txg the payload was physically written; zero means same as
    /// `birth_txg`.
    pub phys_birth: u64,
    /// Checksum of the payload. Doubles as the dedup key for deduplicated
    /// blocks.
    pub checksum: u64,
    pub kind: BlockKind,
    pub level: i64,
    /// Entered in the dedup table.
    pub dedup: bool,
}

impl BlockPointer {
    /// A hole: never written, nothing to visit.
    pub fn hole() -> Self {
        Self {
            dvas: Vec::new(),
            lsize: 0,
            psize: 0,
            birth_txg: 0,
            phys_birth: 0,
            checksum: 0,
            kind: BlockKind::Data,
            level: 0,
            dedup: false,
        }
    }

    pub fn is_hole(&self) -> bool {
        self.birth_txg == 0
    }

    /// The txg the payload was physically written in.
    pub fn physical_birth(&self) -> u64 {
        if self.phys_birth != 0 {
            self.phys_birth
        } else {
            self.birth_txg
        }
    }

    /// Identity of the block in the store and cache.
    pub fn id(&self) -> Option<BlockId> {
        self.dvas.first().map(|d| (d.vdev, d.offset))
    }

    pub fn ndvas(&self) -> usize {
        self.dvas.len()
    }

    /// Total allocated size over all replicas.
    pub fn asize(&self) -> u64 {
        self.dvas.iter().map(|d| d.asize).sum()
    }

    /// Number of gang headers among the replicas.
    pub fn count_gangs(&self) -> u64 {
        self.dvas.iter().filter(|d| d.gang).count() as u64
    }
}

impl fmt::Display for BlockPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_hole() {
            return write!(f, "<hole>");
        }
        write!(
            f,
            "{:?} L{} birth={} cksum={:x} ndvas={}",
            self.kind,
            self.level,
            self.birth_txg,
            self.checksum,
            self.ndvas()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hole_has_no_identity() {
        let bp = BlockPointer::hole();
        assert!(bp.is_hole());
        assert!(bp.id().is_none());
        assert_eq!(bp.asize(), 0);
    }

    #[test]
    fn physical_birth_falls_back_to_birth() {
        let mut bp = BlockPointer::hole();
        bp.birth_txg = 7;
        assert_eq!(bp.physical_birth(), 7);
        bp.phys_birth = 5;
        assert_eq!(bp.physical_birth(), 5);
    }
}
