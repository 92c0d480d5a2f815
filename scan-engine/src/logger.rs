//! Tracing setup for the engine and its tests.

use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static LOGGER: OnceCell<()> = OnceCell::new();

/// Initialise the global tracing subscriber. The log level is taken from
/// `RUST_LOG` when set, otherwise from the given default filter. Safe to
/// call more than once; only the first call takes effect.
pub fn init_logger(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    LOGGER.get_or_init(|| {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_names(true)
            .init();
    });
}
