//! Two-tier event queue and its delivery loop.
//!
//! Events land in an in-memory FIFO ([`EventBuffer`]); overflow spills into
//! the durable store on the blocking worker. A repeating tick
//! ([`FlushScheduler`]) drives [`DeliveryCoordinator::flush`], which sends
//! both tiers as one batch. [`EventPipeline`] wires the three together.

mod buffer;
mod flush;
mod scheduler;

pub use buffer::EventBuffer;
pub use flush::{DeliveryCoordinator, FlushOutcome};
pub use scheduler::FlushScheduler;

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::config::TrackerConfig;
use crate::delivery::{DeliveryClient, Reachability};
use crate::event::Event;
use crate::runtime::Timer;
use crate::storage::Storage;

/// Where producers (the tracker facade, heartbeat managers) hand off events.
pub trait EventSink: Send + Sync {
    fn enqueue(&self, event: Event);
}

pub struct EventPipeline {
    buffer: Arc<EventBuffer>,
    scheduler: Arc<FlushScheduler>,
    coordinator: Arc<DeliveryCoordinator>,
    runtime: Handle,
}

impl EventPipeline {
    pub fn new(
        config: &TrackerConfig,
        timer: Timer,
        storage: Arc<dyn Storage>,
        client: Arc<dyn DeliveryClient>,
        reachability: Arc<dyn Reachability>,
    ) -> Self {
        let runtime = timer.handle().clone();
        let buffer = Arc::new(EventBuffer::new(
            storage,
            config.queue_size_limit,
            config.storage_size_limit,
            config.overflow_mode,
            runtime.clone(),
        ));
        let scheduler = Arc::new(FlushScheduler::new(timer, config.flush_interval()));
        let coordinator = Arc::new(DeliveryCoordinator::new(
            Arc::clone(&buffer),
            Arc::clone(&scheduler),
            client,
            reachability,
            config.endpoint.trim(),
            config.dry_run,
        ));
        Self {
            buffer,
            scheduler,
            coordinator,
            runtime,
        }
    }

    /// Start the repeating flush tick if it is not already running.
    pub fn start_flush_timer(&self) -> bool {
        let coordinator = Arc::downgrade(&self.coordinator);
        let runtime = self.runtime.clone();
        self.scheduler.start(move || {
            if let Some(coordinator) = coordinator.upgrade() {
                runtime.spawn(async move {
                    coordinator.flush().await;
                });
            }
        })
    }

    pub fn stop_flush_timer(&self) -> bool {
        self.scheduler.stop()
    }

    pub fn is_flush_timer_running(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn flush_interval(&self) -> Duration {
        self.scheduler.interval()
    }

    /// Flush now and wait for the outcome.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.coordinator.flush().await
    }

    /// Flush on the runtime without waiting.
    pub fn flush_in_background(&self) {
        let coordinator = Arc::clone(&self.coordinator);
        self.runtime.spawn(async move {
            coordinator.flush().await;
        });
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub async fn stored_size(&self) -> usize {
        self.buffer.stored_len().await
    }

    /// Wait for every pending overflow check.
    pub async fn settle(&self) {
        self.buffer.settle().await;
    }
}

impl EventSink for EventPipeline {
    fn enqueue(&self, event: Event) {
        self.buffer.push(event);
        self.start_flush_timer();
    }
}

impl Drop for EventPipeline {
    fn drop(&mut self) {
        self.scheduler.stop();
    }
}
