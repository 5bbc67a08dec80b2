use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

struct TaskState {
    state: AtomicU8,
    abort: Mutex<Option<AbortHandle>>,
}

impl TaskState {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            abort: Mutex::new(None),
        }
    }

    fn try_fire(&self) -> bool {
        self.state
            .compare_exchange(PENDING, RUNNING, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    fn is_pending(&self) -> bool {
        self.state.load(Ordering::SeqCst) == PENDING
    }
}

/// Marks a task finished when its body ends, including by a panicking
/// callback. Leaves a task that was cancelled meanwhile alone.
struct FinishGuard<'a> {
    task: &'a TaskState,
    from: u8,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        let _ = self.task.state.compare_exchange(
            self.from,
            FINISHED,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Handle to a scheduled callback.
///
/// One-shot tasks are pending until they fire; repeating tasks stay pending
/// until cancelled.
#[derive(Clone)]
pub struct TaskHandle {
    inner: Arc<TaskState>,
}

impl TaskHandle {
    /// Cancel the task if it has not fired yet.
    ///
    /// Returns `true` only when this call prevented a pending callback from
    /// running. A callback that is already executing finishes normally and
    /// this returns `false`.
    pub fn cancel(&self) -> bool {
        let cancelled = self
            .inner
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if cancelled {
            let abort = self
                .inner
                .abort
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(abort) = abort {
                abort.abort();
            }
        }
        cancelled
    }

    pub fn is_pending(&self) -> bool {
        self.inner.is_pending()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.inner.state.load(Ordering::SeqCst) {
            PENDING => "pending",
            RUNNING => "running",
            FINISHED => "finished",
            _ => "cancelled",
        };
        f.debug_struct("TaskHandle").field("state", &state).finish()
    }
}

/// Single scheduling facility for every periodic callback in the crate.
///
/// Callbacks run on the tokio runtime, never on the thread that scheduled
/// them, and are serialized through one lane so two callbacks never run at
/// the same time. Callbacks are expected to be short: anything that blocks
/// or awaits should be handed to the runtime from inside the callback.
#[derive(Clone)]
pub struct Timer {
    handle: Handle,
    lane: Arc<Mutex<()>>,
}

impl Timer {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            lane: Arc::new(Mutex::new(())),
        }
    }

    /// Timer bound to the runtime of the calling context.
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn schedule_once<F>(&self, delay: Duration, callback: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let state = Arc::new(TaskState::new());
        let task = Arc::clone(&state);
        let lane = Arc::clone(&self.lane);

        let join = self.handle.spawn(async move {
            time::sleep(delay).await;
            if !task.try_fire() {
                return;
            }
            let _finish = FinishGuard {
                task: &task,
                from: RUNNING,
            };
            let _lane = lane.lock().unwrap_or_else(PoisonError::into_inner);
            callback();
        });

        *state.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(join.abort_handle());
        TaskHandle { inner: state }
    }

    /// Run `callback` every `interval`, first after one full interval.
    /// Late ticks are delayed rather than bunched up.
    pub fn schedule_repeating<F>(&self, interval: Duration, mut callback: F) -> TaskHandle
    where
        F: FnMut() + Send + 'static,
    {
        let state = Arc::new(TaskState::new());
        let task = Arc::clone(&state);
        let lane = Arc::clone(&self.lane);

        let join = self.handle.spawn(async move {
            let _finish = FinishGuard {
                task: &task,
                from: PENDING,
            };
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !task.is_pending() {
                    break;
                }
                let _lane = lane.lock().unwrap_or_else(PoisonError::into_inner);
                callback();
            }
        });

        *state.abort.lock().unwrap_or_else(PoisonError::into_inner) = Some(join.abort_handle());
        TaskHandle { inner: state }
    }
}
