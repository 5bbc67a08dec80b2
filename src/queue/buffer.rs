use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard, Notify};

use super::FlushScheduler;
use crate::config::OverflowMode;
use crate::event::{dedupe, Event};
use crate::runtime::worker;
use crate::storage::Storage;

/// Proof that the caller holds the buffer's critical section.
pub(crate) type SectionGuard<'a> = AsyncMutexGuard<'a, ()>;

/// In-memory FIFO of pending events backed by the durable store.
///
/// Appends only take a short in-memory lock. Every read-modify-write
/// sequence that spans the two tiers (overflow, flush merge, flush clear)
/// runs under one async critical section, so concurrent overflow checks
/// and flushes never work from stale sizes.
pub struct EventBuffer {
    pending: Mutex<VecDeque<Event>>,
    storage: Arc<dyn Storage>,
    section: AsyncMutex<()>,
    queue_size_limit: usize,
    storage_size_limit: usize,
    overflow_mode: OverflowMode,
    runtime: Handle,
    checks_in_flight: AtomicUsize,
    checks_idle: Notify,
}

impl EventBuffer {
    pub fn new(
        storage: Arc<dyn Storage>,
        queue_size_limit: usize,
        storage_size_limit: usize,
        overflow_mode: OverflowMode,
        runtime: Handle,
    ) -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
            storage,
            section: AsyncMutex::new(()),
            queue_size_limit,
            storage_size_limit,
            overflow_mode,
            runtime,
            checks_in_flight: AtomicUsize::new(0),
            checks_idle: Notify::new(),
        }
    }

    /// Append an event and schedule an overflow check. Never blocks on I/O.
    ///
    /// The check is an async task: it waits for the critical section
    /// without occupying a worker thread and only hands the storage I/O
    /// itself to the worker.
    pub fn push(self: &Arc<Self>, event: Event) {
        let len = {
            let mut pending = self.pending();
            pending.push_back(event);
            pending.len()
        };
        tracing::debug!("event added, {len} pending in memory");

        self.checks_in_flight.fetch_add(1, Ordering::SeqCst);
        let buffer = Arc::clone(self);
        self.runtime.spawn(async move {
            let _done = CheckDone(&buffer);
            buffer.overflow_check().await;
        });
    }

    /// Number of events held in memory.
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of events in the durable store. Unreadable stores count as empty.
    pub async fn stored_len(&self) -> usize {
        let storage = Arc::clone(&self.storage);
        match worker::run_blocking(&self.runtime, move || load_or_empty(storage.as_ref())).await {
            Ok(events) => events.len(),
            Err(e) => {
                tracing::warn!("stored size lookup did not complete: {e}");
                0
            }
        }
    }

    /// Wait until every overflow check scheduled so far has finished.
    pub async fn settle(&self) {
        loop {
            let notified = self.checks_idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.checks_in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Move events into the durable store once the in-memory tier is over
    /// its limit, then drop the oldest in-memory event and, if the store
    /// is now over its own limit, the oldest stored one.
    ///
    /// Limits are soft: either tier can be one over until the next check.
    async fn overflow_check(&self) {
        let _section = self.section.lock().await;

        let spilled: Vec<Event> = {
            let pending = self.pending();
            if pending.len() <= self.queue_size_limit {
                return;
            }
            match self.overflow_mode {
                OverflowMode::SpillOldest => pending.front().cloned().into_iter().collect(),
                OverflowMode::MirrorQueue => pending.iter().cloned().collect(),
            }
        };
        tracing::debug!("queue size exceeded, moving oldest event to durable storage");

        let storage = Arc::clone(&self.storage);
        let storage_size_limit = self.storage_size_limit;
        let persisted = worker::run_blocking(&self.runtime, move || {
            spill(storage.as_ref(), spilled, storage_size_limit)
        })
        .await;
        if let Err(e) = persisted {
            tracing::warn!("overflow persistence did not complete: {e}");
        }

        self.pending().pop_front();
    }

    /// Stop `scheduler` if the in-memory tier is empty, deciding under the
    /// same lock `push` appends under. An event pushed concurrently either
    /// keeps the timer alive here or restarts it after the stop.
    pub(crate) fn stop_timer_if_drained(
        &self,
        _section: &SectionGuard<'_>,
        scheduler: &FlushScheduler,
    ) -> bool {
        let pending = self.pending();
        if !pending.is_empty() {
            return false;
        }
        scheduler.stop();
        true
    }

    pub(crate) async fn lock_section(&self) -> SectionGuard<'_> {
        self.section.lock().await
    }

    pub(crate) fn snapshot(&self, _section: &SectionGuard<'_>) -> Vec<Event> {
        self.pending().iter().cloned().collect()
    }

    pub(crate) async fn load_stored(&self, _section: &SectionGuard<'_>) -> Vec<Event> {
        let storage = Arc::clone(&self.storage);
        match worker::run_blocking(&self.runtime, move || load_or_empty(storage.as_ref())).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!("loading stored events did not complete: {e}");
                Vec::new()
            }
        }
    }

    /// Forget everything a flush read: the first `delivered` in-memory
    /// events and the whole durable store. Events appended after the
    /// snapshot stay queued. Returns whether the store was cleared.
    pub(crate) async fn clear_delivered(&self, _section: &SectionGuard<'_>, delivered: usize) -> bool {
        {
            let mut pending = self.pending();
            let delivered = delivered.min(pending.len());
            pending.drain(..delivered);
        }

        let storage = Arc::clone(&self.storage);
        let cleared = worker::run_blocking(&self.runtime, move || {
            worker::assert_worker_context("clearing stored events");
            storage.save(&[])
        })
        .await;
        match cleared {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!("failed to clear stored events: {e}");
                false
            }
            Err(e) => {
                tracing::warn!("clearing stored events did not complete: {e}");
                false
            }
        }
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<Event>> {
        self.pending.lock().expect("event buffer mutex poisoned")
    }

    fn finish_check(&self) {
        if self.checks_in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.checks_idle.notify_waiters();
        }
    }
}

struct CheckDone<'a>(&'a EventBuffer);

impl Drop for CheckDone<'_> {
    fn drop(&mut self) {
        self.0.finish_check();
    }
}

/// Load the store, treating an unreadable one as empty from here on.
fn load_or_empty(storage: &dyn Storage) -> Vec<Event> {
    worker::assert_worker_context("loading stored events");
    match storage.load() {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!("stored events unreadable, treating store as empty: {e}");
            Vec::new()
        }
    }
}

/// Merge `spilled` into the store and evict its oldest event if the
/// store is now over `storage_size_limit`.
fn spill(storage: &dyn Storage, spilled: Vec<Event>, storage_size_limit: usize) {
    let stored = load_or_empty(storage);
    let merged = dedupe(stored.into_iter().chain(spilled));
    if let Err(e) = storage.save(&merged) {
        tracing::warn!("failed to persist overflowing events: {e}");
        return;
    }

    if merged.len() > storage_size_limit {
        tracing::debug!(
            "durable storage over limit ({} > {storage_size_limit}), evicting oldest event",
            merged.len()
        );
        if let Err(e) = storage.evict_oldest() {
            tracing::warn!("failed to evict oldest stored event: {e}");
        }
    }
}
