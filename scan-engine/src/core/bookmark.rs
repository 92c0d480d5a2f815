use std::fmt;

use crate::core::{
    objset::DnodePhys,
    BLKPTR_SHIFT,
    DNODE_BLOCK_SHIFT,
    DNODE_SHIFT,
    MIN_BLOCK_SHIFT,
};

/// Object set id of the meta object set.
pub const META_OBJSET: u64 = 0;
/// Sentinel object set id recorded when the dataset under traversal was
/// destroyed out from under the scan.
pub const DESTROYED_OBJSET: u64 = u64::MAX;

/// Object/level/blkid of a dataset's root block pointer.
pub const ROOT_OBJECT: u64 = 0;
pub const ROOT_LEVEL: i64 = -1;
pub const ROOT_BLKID: u64 = 0;

/// Intent log blocks are located with a dedicated level and object.
pub const ZIL_OBJECT: u64 = 0;
pub const ZIL_LEVEL: i64 = -2;

/// The meta dnode of an object set.
pub const META_DNODE_OBJECT: u64 = 0;
/// Spill blocks hang off a dnode under this block id.
pub const SPILL_BLKID: u64 = u64::MAX;

// Accounting objects have "negative" ids; they are never skipped and never
// paused on.
pub const USERUSED_OBJECT: u64 = u64::MAX;
pub const GROUPUSED_OBJECT: u64 = u64::MAX - 1;
/// The deadlist orders after every other object.
pub const DEADLIST_OBJECT: u64 = u64::MAX - 2;

/// An ordered locator into the block-pointer tree of one dataset:
/// `<objset, object, level, blkid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bookmark {
    pub objset: u64,
    pub object: u64,
    pub level: i64,
    pub blkid: u64,
}

impl Bookmark {
    pub fn new(objset: u64, object: u64, level: i64, blkid: u64) -> Self {
        Self {
            objset,
            object,
            level,
            blkid,
        }
    }

    /// Locator of the root block pointer of the given object set.
    pub fn root_of(objset: u64) -> Self {
        Self::new(objset, ROOT_OBJECT, ROOT_LEVEL, ROOT_BLKID)
    }

    /// The all-zero bookmark means "not resuming".
    pub fn is_zero(&self) -> bool {
        self.objset == 0 && self.object == 0 && self.level == 0 && self.blkid == 0
    }

    /// True when the object id addresses a user/group accounting object.
    pub fn is_accounting_object(&self) -> bool {
        (self.object as i64) < 0
    }
}

impl fmt::Display for Bookmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:x}/{:x}/{:x}/{:x}",
            self.objset, self.object, self.level, self.blkid
        )
    }
}

/// Whether everything at or below `zb1` was already visited by a traversal
/// that paused at the level-0 locator `zb2`. `dnp` is the dnode holding
/// `zb1.object`, absent for object set roots.
///
/// The comparison projects `zb1`'s next level-0 position forward and orders
/// it against `zb2`, deriving object ids from dnode-block positions when
/// either side addresses the meta dnode.
pub fn bookmark_is_before(dnp: Option<&DnodePhys>, zb1: &Bookmark, zb2: &Bookmark) -> bool {
    debug_assert_eq!(zb1.objset, zb2.objset);
    debug_assert_eq!(zb2.level, 0);

    // A bookmark in the deadlist is considered to be after everything else.
    if zb2.object == DEADLIST_OBJECT {
        return true;
    }

    // The object set root isn't before anything.
    let dnp = match dnp {
        Some(dnp) => dnp,
        None => return false,
    };

    let zb1_next_l0 = (zb1.blkid + 1)
        << ((zb1.level as u64) * (dnp.indblkshift as u64 - BLKPTR_SHIFT as u64));

    let zb2_this_obj = if zb2.object != 0 {
        zb2.object
    } else {
        zb2.blkid << (DNODE_BLOCK_SHIFT - DNODE_SHIFT)
    };

    if zb1.object == META_DNODE_OBJECT {
        let next_obj =
            zb1_next_l0 * ((dnp.datablkszsec as u64) << MIN_BLOCK_SHIFT) >> DNODE_SHIFT;
        return next_obj <= zb2_this_obj;
    }

    if zb1.object < zb2_this_obj {
        return true;
    }
    if zb1.object > zb2_this_obj {
        return false;
    }
    if zb2.object == META_DNODE_OBJECT {
        return false;
    }
    zb1_next_l0 <= zb2.blkid
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dnode(indblkshift: u8, datablksz: u32) -> DnodePhys {
        DnodePhys::new(1, indblkshift, datablksz)
    }

    #[test]
    fn zero_bookmark() {
        assert!(Bookmark::default().is_zero());
        assert!(!Bookmark::new(0, 0, 0, 1).is_zero());
        assert!(!Bookmark::root_of(META_OBJSET).is_zero());
    }

    #[test]
    fn accounting_objects_are_negative() {
        assert!(Bookmark::new(1, USERUSED_OBJECT, 0, 0).is_accounting_object());
        assert!(Bookmark::new(1, GROUPUSED_OBJECT, 0, 0).is_accounting_object());
        assert!(!Bookmark::new(1, 5, 0, 0).is_accounting_object());
    }

    #[test]
    fn deadlist_orders_last() {
        let zb1 = Bookmark::new(1, 10, 0, 3);
        let zb2 = Bookmark::new(1, DEADLIST_OBJECT, 0, 0);
        assert!(bookmark_is_before(None, &zb1, &zb2));
    }

    #[test]
    fn root_is_not_before() {
        let zb1 = Bookmark::root_of(1);
        let zb2 = Bookmark::new(1, 4, 0, 0);
        assert!(!bookmark_is_before(None, &zb1, &zb2));
    }

    #[test]
    fn earlier_object_is_before() {
        let dn = dnode(10, 4096);
        let zb1 = Bookmark::new(1, 3, 0, 9);
        let zb2 = Bookmark::new(1, 4, 0, 0);
        assert!(bookmark_is_before(Some(&dn), &zb1, &zb2));
        assert!(!bookmark_is_before(Some(&dn), &zb2, &Bookmark::new(1, 3, 0, 9)));
    }

    #[test]
    fn same_object_compares_leaf_projection() {
        let dn = dnode(10, 4096);
        // L1 block 0 with 8 children covers L0 blkids [0, 7].
        let l1 = Bookmark::new(1, 4, 1, 0);
        assert!(bookmark_is_before(Some(&dn), &l1, &Bookmark::new(1, 4, 0, 8)));
        assert!(!bookmark_is_before(Some(&dn), &l1, &Bookmark::new(1, 4, 0, 7)));
    }

    #[test]
    fn strictly_before_keeps_the_bookmarked_block() {
        let dn = dnode(10, 4096);
        // Resuming from L0 blkid 5: blkid 5 itself is not "before".
        let zb = Bookmark::new(1, 4, 0, 5);
        assert!(!bookmark_is_before(Some(&dn), &zb, &zb));
        assert!(bookmark_is_before(
            Some(&dn),
            &Bookmark::new(1, 4, 0, 4),
            &zb
        ));
    }

    #[test]
    fn meta_dnode_projects_object_ids() {
        // Meta dnode with 16K data blocks: 32 dnodes per block.
        let dn = dnode(10, 16384);
        let zb1 = Bookmark::new(1, META_DNODE_OBJECT, 0, 0);
        // First meta dnode block covers objects [0, 31].
        assert!(bookmark_is_before(Some(&dn), &zb1, &Bookmark::new(1, 32, 0, 0)));
        assert!(!bookmark_is_before(Some(&dn), &zb1, &Bookmark::new(1, 31, 0, 0)));
    }
}
