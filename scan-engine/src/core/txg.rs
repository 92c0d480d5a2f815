/// The first txg a pool can commit.
pub const TXG_INITIAL: u64 = 1;

/// Transaction group bookkeeping for one pool.
#[derive(Debug)]
pub struct TxgState {
    pub current: u64,
    /// Sync pass within the current txg; the scan only runs on pass one.
    pub sync_pass: u64,
    /// Whether a txg sync is waiting to start; feeds the pause predicate.
    pub sync_waiting: bool,
}

impl TxgState {
    pub fn new(first_txg: u64) -> Self {
        Self {
            current: first_txg,
            sync_pass: 0,
            sync_waiting: false,
        }
    }
}

/// Handle on one transaction group, passed through every sync-context
/// operation.
#[derive(Debug, Clone, Copy)]
pub struct Tx {
    pub txg: u64,
    pub pass: u64,
}
