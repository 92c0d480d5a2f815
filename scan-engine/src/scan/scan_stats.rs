use std::fmt;

use byte_unit::Byte;

use crate::scan::{ScanFunc, ScanState};
use crate::core::{BlockPointer, BLOCK_KINDS};

/// Rows for levels 0..=5 plus a totals row.
pub const BLKSTATS_LEVELS: usize = 7;
/// Columns per block kind plus a totals column.
pub const BLKSTATS_KINDS: usize = BLOCK_KINDS + 1;

/// Counters for one (level, kind) cell of the block statistics table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BlockStat {
    pub count: u64,
    pub asize: u64,
    pub lsize: u64,
    pub psize: u64,
    pub gangs: u64,
    /// Both replicas of a 2-copy block on one device.
    pub ditto_2_of_2_samevdev: u64,
    /// Two of three replicas on one device.
    pub ditto_2_of_3_samevdev: u64,
    /// All three replicas on one device.
    pub ditto_3_of_3_samevdev: u64,
}

/// Block statistics accumulated over one scan, indexed by indirection
/// level and block kind, with totals along both axes.
#[derive(Debug, Clone)]
pub struct BlockStats {
    table: [[BlockStat; BLKSTATS_KINDS]; BLKSTATS_LEVELS],
}

impl Default for BlockStats {
    fn default() -> Self {
        Self {
            table: [[BlockStat::default(); BLKSTATS_KINDS]; BLKSTATS_LEVELS],
        }
    }
}

impl BlockStats {
    /// Account one visited block into its cell, the per-level and per-kind
    /// totals, and the grand total.
    pub fn count_block(&mut self, bp: &BlockPointer) {
        let level = (bp.level.max(0) as usize).min(BLKSTATS_LEVELS - 2);
        let kind = bp.kind.index();

        for i in 0..4 {
            let l = if i < 2 { level } else { BLKSTATS_LEVELS - 1 };
            let k = if i & 1 == 1 { kind } else { BLKSTATS_KINDS - 1 };
            let cell = &mut self.table[l][k];

            cell.count += 1;
            cell.asize += bp.asize();
            cell.lsize += bp.lsize;
            cell.psize += bp.psize;
            cell.gangs += bp.count_gangs();

            match bp.ndvas() {
                2 => {
                    if bp.dvas[0].vdev == bp.dvas[1].vdev {
                        cell.ditto_2_of_2_samevdev += 1;
                    }
                }
                3 => {
                    let equal = (bp.dvas[0].vdev == bp.dvas[1].vdev) as u64
                        + (bp.dvas[0].vdev == bp.dvas[2].vdev) as u64
                        + (bp.dvas[1].vdev == bp.dvas[2].vdev) as u64;
                    if equal == 1 {
                        cell.ditto_2_of_3_samevdev += 1;
                    } else if equal == 3 {
                        cell.ditto_3_of_3_samevdev += 1;
                    }
                }
                _ => {}
            }
        }
    }

    pub fn cell(&self, level: usize, kind: usize) -> &BlockStat {
        &self.table[level][kind]
    }

    /// The grand-total cell.
    pub fn total(&self) -> &BlockStat {
        &self.table[BLKSTATS_LEVELS - 1][BLKSTATS_KINDS - 1]
    }
}

/// Snapshot of a scan for status rendering.
#[derive(Debug, Clone)]
pub struct ScanStatus {
    pub func: ScanFunc,
    pub state: ScanState,
    pub start_time: u64,
    pub end_time: u64,
    pub to_examine: u64,
    pub examined: u64,
    pub processed: u64,
    pub errors: u64,
    /// Start of the current pass and bytes examined in it.
    pub pass_start: u64,
    pub pass_exam: u64,
    /// Scrub reads currently outstanding.
    pub inflight: u64,
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let examined = Byte::from_bytes(self.examined as u128)
            .get_appropriate_unit(true)
            .to_string();
        let total = Byte::from_bytes(self.to_examine as u128)
            .get_appropriate_unit(true)
            .to_string();
        write!(
            f,
            "{} {}: {} / {} examined, {} errors",
            self.func, self.state, examined, total, self.errors
        )
    }
}
