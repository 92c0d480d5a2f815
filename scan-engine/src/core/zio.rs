use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::core::{runtime, BlockContents, BlockPointer, Bookmark, CoreError, Pool};

/// Flags attached to pipeline I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ZioFlags(u32);

impl ZioFlags {
    pub const CANFAIL: ZioFlags = ZioFlags(1 << 0);
    pub const MUSTSUCCEED: ZioFlags = ZioFlags(1 << 1);
    pub const SCRUB_THREAD: ZioFlags = ZioFlags(1 << 2);
    pub const RAW: ZioFlags = ZioFlags(1 << 3);
    pub const SCRUB: ZioFlags = ZioFlags(1 << 4);
    pub const RESILVER: ZioFlags = ZioFlags(1 << 5);
    /// Failure is anticipated; checksum errors are not reported.
    pub const SPECULATIVE: ZioFlags = ZioFlags(1 << 6);

    pub fn contains(self, other: ZioFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ZioFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        ZioFlags(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ZioFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Scheduling class of pipeline I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZioPriority {
    AsyncRead,
    Scrub,
    Resilver,
}

#[derive(Debug, Default)]
struct ZioState {
    outstanding: u64,
    errors: u64,
}

/// A per-txg aggregation handle for asynchronous I/O. Children are
/// dispatched onto the I/O runtime; `wait` blocks the sync thread until
/// every child has completed.
pub struct Zio {
    pool: Pool,
    flags: ZioFlags,
    state: Mutex<ZioState>,
    cv: Condvar,
}

impl Zio {
    pub fn root(pool: &Pool, flags: ZioFlags) -> Arc<Zio> {
        Arc::new(Zio {
            pool: pool.clone(),
            flags,
            state: Mutex::new(ZioState::default()),
            cv: Condvar::new(),
        })
    }

    /// Issue an asynchronous read; `done` runs on the I/O runtime with the
    /// outcome.
    pub fn read_nowait(
        self: &Arc<Self>,
        bp: &BlockPointer,
        _priority: ZioPriority,
        _flags: ZioFlags,
        zb: &Bookmark,
        done: impl FnOnce(Result<Arc<BlockContents>, CoreError>) + Send + 'static,
    ) {
        self.state.lock().outstanding += 1;
        let this = Arc::clone(self);
        let bp = bp.clone();
        let zb = *zb;
        runtime::spawn(async move {
            let result = this.pool.read_block(&bp);
            if result.is_err() {
                trace!("async read failed at {}", zb);
            }
            let failed = result.is_err();
            done(result);
            this.child_done(failed);
        });
    }

    /// Issue an asynchronous free of every replica of `bp`.
    pub fn free_nowait(self: &Arc<Self>, bp: BlockPointer, txg: u64) {
        self.state.lock().outstanding += 1;
        let this = Arc::clone(self);
        runtime::spawn(async move {
            this.pool.free_block(&bp, txg);
            this.child_done(false);
        });
    }

    fn child_done(&self, failed: bool) {
        let mut state = self.state.lock();
        state.outstanding -= 1;
        if failed {
            state.errors += 1;
        }
        self.cv.notify_all();
    }

    /// Block until every child has completed; returns the number of failed
    /// children. A must-succeed root asserts none did.
    pub fn wait(&self) -> u64 {
        let mut state = self.state.lock();
        while state.outstanding > 0 {
            self.cv.wait(&mut state);
        }
        if !self.flags.contains(ZioFlags::CANFAIL) {
            assert_eq!(state.errors, 0, "must-succeed I/O failed");
        }
        state.errors
    }
}
