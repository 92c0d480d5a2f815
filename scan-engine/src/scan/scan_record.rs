use strum_macros::Display;

use crate::{
    core::{Bookmark, DdtBookmark},
    scan::ScanError,
};

/// What the scan is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ScanFunc {
    None = 0,
    Scrub = 1,
    Resilver = 2,
}

impl ScanFunc {
    fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(ScanFunc::None),
            1 => Some(ScanFunc::Scrub),
            2 => Some(ScanFunc::Resilver),
            _ => None,
        }
    }
}

/// Where the scan is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ScanState {
    None = 0,
    Scanning = 1,
    Finished = 2,
    Canceled = 3,
}

impl ScanState {
    fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(ScanState::None),
            1 => Some(ScanState::Scanning),
            2 => Some(ScanState::Finished),
            3 => Some(ScanState::Canceled),
            _ => None,
        }
    }
}

/// Persisted scan flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanFlags(u64);

impl ScanFlags {
    /// The pass over the current dataset was disturbed (a snapshot under
    /// traversal was destroyed); the dataset must be queued again.
    pub const VISIT_DS_AGAIN: ScanFlags = ScanFlags(1 << 0);

    pub fn contains(self, other: ScanFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: ScanFlags) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: ScanFlags) {
        self.0 &= !other.0;
    }
}

/// Number of integers the scan record occupies in the pool directory.
pub const SCAN_RECORD_NUMINTS: usize = 24;

/// The scan state persisted in the pool's meta directory, one record per
/// pool. Serialized as a fixed array of integers.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub func: ScanFunc,
    pub state: ScanState,
    /// Key/value object holding the dataset work queue.
    pub queue_obj: u64,
    /// The inclusive txg window the scan covers.
    pub min_txg: u64,
    pub max_txg: u64,
    /// The window narrowed to the dataset currently being visited.
    pub cur_min_txg: u64,
    pub cur_max_txg: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub to_examine: u64,
    pub examined: u64,
    pub to_process: u64,
    pub processed: u64,
    pub errors: u64,
    /// Highest-numbered dedup class still covered by the pre-pass.
    pub ddt_class_max: u64,
    /// Cursor into the dedup table pre-pass.
    pub ddt_bookmark: DdtBookmark,
    /// Last visited tree position on pause; zero means not resuming.
    pub bookmark: Bookmark,
    pub flags: ScanFlags,
}

impl Default for ScanRecord {
    fn default() -> Self {
        Self {
            func: ScanFunc::None,
            state: ScanState::None,
            queue_obj: 0,
            min_txg: 0,
            max_txg: 0,
            cur_min_txg: 0,
            cur_max_txg: 0,
            start_time: 0,
            end_time: 0,
            to_examine: 0,
            examined: 0,
            to_process: 0,
            processed: 0,
            errors: 0,
            ddt_class_max: 0,
            ddt_bookmark: DdtBookmark::default(),
            bookmark: Bookmark::default(),
            flags: ScanFlags::default(),
        }
    }
}

impl ScanRecord {
    /// Serialize for the pool directory.
    pub fn to_raw(&self) -> [u64; SCAN_RECORD_NUMINTS] {
        [
            self.func as u64,
            self.state as u64,
            self.queue_obj,
            self.min_txg,
            self.max_txg,
            self.cur_min_txg,
            self.cur_max_txg,
            self.start_time,
            self.end_time,
            self.to_examine,
            self.examined,
            self.to_process,
            self.processed,
            self.errors,
            self.ddt_class_max,
            self.ddt_bookmark.class,
            self.ddt_bookmark.kind,
            self.ddt_bookmark.checksum,
            self.ddt_bookmark.cursor,
            self.bookmark.objset,
            self.bookmark.object,
            self.bookmark.level as u64,
            self.bookmark.blkid,
            self.flags.0,
        ]
    }

    /// Reload from the pool directory.
    pub fn from_raw(raw: &[u64]) -> Result<Self, ScanError> {
        if raw.len() != SCAN_RECORD_NUMINTS {
            return Err(ScanError::BadRecord {});
        }
        let func = ScanFunc::from_u64(raw[0]).ok_or(ScanError::BadRecord {})?;
        let state = ScanState::from_u64(raw[1]).ok_or(ScanError::BadRecord {})?;
        Ok(Self {
            func,
            state,
            queue_obj: raw[2],
            min_txg: raw[3],
            max_txg: raw[4],
            cur_min_txg: raw[5],
            cur_max_txg: raw[6],
            start_time: raw[7],
            end_time: raw[8],
            to_examine: raw[9],
            examined: raw[10],
            to_process: raw[11],
            processed: raw[12],
            errors: raw[13],
            ddt_class_max: raw[14],
            ddt_bookmark: DdtBookmark {
                class: raw[15],
                kind: raw[16],
                checksum: raw[17],
                cursor: raw[18],
            },
            bookmark: Bookmark {
                objset: raw[19],
                object: raw[20],
                level: raw[21] as i64,
                blkid: raw[22],
            },
            flags: ScanFlags(raw[23]),
        })
    }
}
