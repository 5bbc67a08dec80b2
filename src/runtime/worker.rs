//! Blocking worker for durable-storage I/O.
//!
//! Storage reads and writes may block, so they only ever run on tokio's
//! blocking pool through [`spawn_blocking`] / [`run_blocking`]. Code that
//! touches storage calls [`assert_worker_context`] first; reaching storage
//! from any other thread is a programming error and panics.

use std::cell::Cell;

use tokio::runtime::Handle;
use tokio::task::{JoinError, JoinHandle};

thread_local! {
    static IN_WORKER: Cell<bool> = const { Cell::new(false) };
}

struct WorkerScope {
    previous: bool,
}

impl WorkerScope {
    fn enter() -> Self {
        let previous = IN_WORKER.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for WorkerScope {
    fn drop(&mut self) {
        IN_WORKER.with(|flag| flag.set(self.previous));
    }
}

/// Whether the current thread is executing a worker job.
pub fn in_worker() -> bool {
    IN_WORKER.with(Cell::get)
}

/// Panics unless called from a worker job.
pub fn assert_worker_context(operation: &str) {
    assert!(
        in_worker(),
        "{operation} performs durable-storage I/O and must run on the background worker, not on the calling thread"
    );
}

pub fn spawn_blocking<F, R>(handle: &Handle, job: F) -> JoinHandle<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    handle.spawn_blocking(move || {
        let _scope = WorkerScope::enter();
        job()
    })
}

/// Run `job` on the worker and wait for it.
///
/// A panic inside the job is re-raised here. An error is only returned
/// when the runtime cancelled the job (shutdown).
pub async fn run_blocking<F, R>(handle: &Handle, job: F) -> Result<R, JoinError>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    match spawn_blocking(handle, job).await {
        Ok(value) => Ok(value),
        Err(error) if error.is_panic() => std::panic::resume_unwind(error.into_panic()),
        Err(error) => Err(error),
    }
}
