use snafu::Snafu;

use crate::core::CoreError;

/// Outcomes of the scan engine's public operations and traversal steps.
#[derive(Debug, Snafu, Clone)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub enum ScanError {
    #[snafu(display("A scan is already in progress"))]
    Busy {},
    #[snafu(display("No scan is in progress"))]
    NotFound {},
    #[snafu(display("Per-txg time budget exhausted"))]
    Restart {},
    #[snafu(display("I/O error during traversal: {}", source))]
    Io { source: CoreError },
    #[snafu(display("The persisted scan record is damaged"))]
    BadRecord {},
}
