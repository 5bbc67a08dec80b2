use std::sync::Mutex;
use std::time::Duration;

use crate::runtime::{TaskHandle, Timer};

/// Owns the single repeating flush tick.
///
/// Starting an already running scheduler is a no-op, so every enqueue can
/// call [`FlushScheduler::start`] without stacking timers.
pub struct FlushScheduler {
    timer: Timer,
    interval: Duration,
    task: Mutex<Option<TaskHandle>>,
}

impl FlushScheduler {
    pub fn new(timer: Timer, interval: Duration) -> Self {
        Self {
            timer,
            interval,
            task: Mutex::new(None),
        }
    }

    /// Schedule `on_tick` every interval unless a tick is already scheduled.
    /// Returns whether a new tick was created.
    pub fn start<F>(&self, on_tick: F) -> bool
    where
        F: FnMut() + Send + 'static,
    {
        let mut task = self.task.lock().expect("flush scheduler mutex poisoned");
        if task.as_ref().is_some_and(TaskHandle::is_pending) {
            return false;
        }
        *task = Some(self.timer.schedule_repeating(self.interval, on_tick));
        tracing::info!("flush timer set to {}s", self.interval.as_secs());
        true
    }

    /// Cancel the tick. Returns whether one was running.
    pub fn stop(&self) -> bool {
        let task = self
            .task
            .lock()
            .expect("flush scheduler mutex poisoned")
            .take();
        let stopped = task.is_some_and(|task| task.cancel());
        if stopped {
            tracing::info!("flush timer cleared");
        }
        stopped
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("flush scheduler mutex poisoned")
            .as_ref()
            .is_some_and(TaskHandle::is_pending)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for FlushScheduler {
    fn drop(&mut self) {
        if let Ok(task) = self.task.get_mut() {
            if let Some(task) = task.take() {
                task.cancel();
            }
        }
    }
}
