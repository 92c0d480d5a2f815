//!
//! Executor for the scan's asynchronous I/O: prefetch reads, scrub reads
//! and deferred frees all dispatch here so the txg sync thread never
//! blocks on an individual operation. Completion is observed through the
//! counters on the issuing handles (the root zio and the scrub inflight
//! pair), never by joining a task.

use std::future::Future;

use once_cell::sync::Lazy;

/// Worker threads serving scan I/O. The traversal itself is single
/// threaded; this only has to keep a handful of simulated devices busy.
const IO_WORKERS: usize = 4;

static IO_RUNTIME: Lazy<tokio::runtime::Runtime> = Lazy::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name("scan-io")
        .worker_threads(IO_WORKERS)
        .enable_all()
        .build()
        .expect("scan I/O runtime failed to start")
});

/// Dispatch one I/O operation. The task is detached; whoever issued it is
/// responsible for tracking its completion.
pub fn spawn(op: impl Future<Output = ()> + Send + 'static) {
    let _task = IO_RUNTIME.spawn(op);
}
