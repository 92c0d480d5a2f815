//! Fault injection for exercising the error paths of the read pipeline.

use parking_lot::Mutex;

use crate::core::BlockId;

/// What a registered injection makes the read path return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// The read completes but checksum verification fails.
    Checksum,
    /// The read itself fails.
    Io,
}

/// One injected fault, keyed by block identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Injection {
    pub block: BlockId,
    pub kind: FaultKind,
}

/// Registry of active injections, consulted on every device read.
#[derive(Debug, Default)]
pub struct FaultRegistry {
    injections: Mutex<Vec<Injection>>,
}

impl FaultRegistry {
    pub fn add(&self, injection: Injection) {
        self.injections.lock().push(injection);
    }

    pub fn remove(&self, block: BlockId) {
        self.injections.lock().retain(|i| i.block != block);
    }

    pub fn clear(&self) {
        self.injections.lock().clear();
    }

    /// The fault registered for `block`, if any.
    pub fn check(&self, block: BlockId) -> Option<FaultKind> {
        self.injections
            .lock()
            .iter()
            .find(|i| i.block == block)
            .map(|i| i.kind)
    }
}
