use std::sync::Arc;

use super::{EventBuffer, FlushScheduler};
use crate::delivery::{encode_batch, DeliveryClient, Reachability};
use crate::event::dedupe;

/// What a single flush did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Both tiers were empty; the flush timer was stopped.
    Idle,
    /// The network was down; nothing was attempted.
    Unreachable,
    /// Debug mode: the batch was logged and dropped.
    DryRun { events: usize },
    Sent { events: usize },
    /// The transport failed; every event is still queued.
    Failed { events: usize },
}

impl FlushOutcome {
    pub fn delivered(&self) -> usize {
        match self {
            Self::DryRun { events } | Self::Sent { events } => *events,
            _ => 0,
        }
    }
}

/// Merges both tiers into one batch, ships it, and clears what was sent.
pub struct DeliveryCoordinator {
    buffer: Arc<EventBuffer>,
    scheduler: Arc<FlushScheduler>,
    client: Arc<dyn DeliveryClient>,
    reachability: Arc<dyn Reachability>,
    endpoint: String,
    dry_run: bool,
}

impl DeliveryCoordinator {
    pub fn new(
        buffer: Arc<EventBuffer>,
        scheduler: Arc<FlushScheduler>,
        client: Arc<dyn DeliveryClient>,
        reachability: Arc<dyn Reachability>,
        endpoint: impl Into<String>,
        dry_run: bool,
    ) -> Self {
        Self {
            buffer,
            scheduler,
            client,
            reachability,
            endpoint: endpoint.into(),
            dry_run,
        }
    }

    /// Flush both tiers.
    ///
    /// Holds the buffer's critical section for the whole operation,
    /// including the network round trip, so an overflow check can never
    /// move events between tiers while a batch is in flight. Concurrent
    /// flushes queue up behind each other.
    pub async fn flush(&self) -> FlushOutcome {
        let section = self.buffer.lock_section().await;

        let pending = self.buffer.snapshot(&section);
        let stored = self.buffer.load_stored(&section).await;
        if pending.is_empty() && stored.is_empty() {
            if self.buffer.stop_timer_if_drained(&section, &self.scheduler) {
                tracing::debug!("nothing to flush, stopped flush timer");
            }
            return FlushOutcome::Idle;
        }

        if !self.reachability.is_reachable() {
            tracing::info!("network unreachable, skipping flush");
            return FlushOutcome::Unreachable;
        }

        let delivered_from_memory = pending.len();
        let stored_count = stored.len();
        let batch = dedupe(stored.into_iter().chain(pending));
        let count = batch.len();
        tracing::debug!(
            "flushing {count} events ({delivered_from_memory} in memory, {stored_count} stored)"
        );

        let outcome = if self.dry_run {
            match encode_batch(&batch) {
                Ok(payload) => tracing::info!("dry run, not sending: {payload}"),
                Err(e) => tracing::info!("dry run, not sending {count} events: {e}"),
            }
            FlushOutcome::DryRun { events: count }
        } else {
            let payload = match encode_batch(&batch) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!("failed to encode batch of {count} events: {e}");
                    return FlushOutcome::Failed { events: count };
                }
            };
            match self.client.send(&self.endpoint, payload).await {
                Ok(()) => {
                    tracing::info!("delivered {count} events");
                    FlushOutcome::Sent { events: count }
                }
                Err(e) => {
                    tracing::warn!("delivery of {count} events failed, keeping them queued: {e}");
                    return FlushOutcome::Failed { events: count };
                }
            }
        };

        let store_cleared = self
            .buffer
            .clear_delivered(&section, delivered_from_memory)
            .await;
        if store_cleared && self.buffer.stop_timer_if_drained(&section, &self.scheduler) {
            tracing::debug!("queue drained, stopped flush timer");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tokio::runtime::Handle;

    use super::*;
    use crate::config::OverflowMode;
    use crate::delivery::ReachabilityFlag;
    use crate::event::Event;
    use crate::runtime::Timer;
    use crate::storage::{MemoryStorage, Storage};
    use crate::testing::FakeDeliveryClient;

    fn event(n: usize) -> Event {
        serde_json::from_value(json!({ "action": "pageview", "n": n })).unwrap()
    }

    struct Fixture {
        buffer: Arc<EventBuffer>,
        scheduler: Arc<FlushScheduler>,
        storage: Arc<MemoryStorage>,
        client: Arc<FakeDeliveryClient>,
        reachability: Arc<ReachabilityFlag>,
    }

    impl Fixture {
        fn new(stored: Vec<Event>) -> Self {
            let storage = Arc::new(MemoryStorage::with_events(stored));
            let buffer = Arc::new(EventBuffer::new(
                storage.clone(),
                50,
                100,
                OverflowMode::SpillOldest,
                Handle::current(),
            ));
            let scheduler = Arc::new(FlushScheduler::new(
                Timer::current(),
                Duration::from_secs(60),
            ));
            Self {
                buffer,
                scheduler,
                storage,
                client: Arc::new(FakeDeliveryClient::new()),
                reachability: Arc::new(ReachabilityFlag::default()),
            }
        }

        fn coordinator(&self, dry_run: bool) -> DeliveryCoordinator {
            DeliveryCoordinator::new(
                self.buffer.clone(),
                self.scheduler.clone(),
                self.client.clone(),
                self.reachability.clone(),
                "https://collector.test/mobileproxy",
                dry_run,
            )
        }

        async fn push(&self, event: Event) {
            self.buffer.push(event);
            self.buffer.settle().await;
        }
    }

    #[tokio::test]
    async fn empty_queue_stops_the_timer_without_sending() {
        let fixture = Fixture::new(Vec::new());
        fixture.scheduler.start(|| {});

        let outcome = fixture.coordinator(false).flush().await;

        assert_eq!(outcome, FlushOutcome::Idle);
        assert!(!fixture.scheduler.is_running());
        assert!(fixture.client.payloads().is_empty());
    }

    #[tokio::test]
    async fn unreachable_network_skips_and_keeps_everything() {
        let fixture = Fixture::new(vec![event(1)]);
        fixture.push(event(2)).await;
        fixture.reachability.set(false);

        let outcome = fixture.coordinator(false).flush().await;

        assert_eq!(outcome, FlushOutcome::Unreachable);
        assert!(fixture.client.payloads().is_empty());
        assert_eq!(fixture.buffer.len(), 1);
        assert_eq!(fixture.storage.load().unwrap(), vec![event(1)]);
    }

    #[tokio::test]
    async fn successful_send_merges_tiers_and_clears_both() {
        let fixture = Fixture::new(vec![event(1)]);
        fixture.push(event(2)).await;
        fixture.push(event(1)).await;
        fixture.scheduler.start(|| {});

        let outcome = fixture.coordinator(false).flush().await;

        assert_eq!(outcome, FlushOutcome::Sent { events: 2 });
        let payloads = fixture.client.payloads();
        assert_eq!(payloads.len(), 1);
        let sent: serde_json::Value = serde_json::from_str(&payloads[0].1).unwrap();
        assert_eq!(sent, json!({ "events": [ { "action": "pageview", "n": 1 }, { "action": "pageview", "n": 2 } ] }));
        assert_eq!(payloads[0].0, "https://collector.test/mobileproxy");

        assert!(fixture.buffer.is_empty());
        assert!(fixture.storage.load().unwrap().is_empty());
        assert!(!fixture.scheduler.is_running());
    }

    #[tokio::test]
    async fn event_pushed_after_the_snapshot_keeps_the_timer_running() {
        let fixture = Fixture::new(Vec::new());
        fixture.push(event(1)).await;
        fixture.scheduler.start(|| {});
        let coordinator = fixture.coordinator(false);

        let section = fixture.buffer.lock_section().await;
        fixture.buffer.push(event(2));
        assert!(!fixture.buffer.stop_timer_if_drained(&section, &fixture.scheduler));
        drop(section);
        fixture.buffer.settle().await;

        assert!(fixture.scheduler.is_running());
        assert_eq!(coordinator.flush().await, FlushOutcome::Sent { events: 2 });
        assert!(!fixture.scheduler.is_running());
    }

    #[tokio::test]
    async fn failed_send_preserves_every_event() {
        let fixture = Fixture::new(vec![event(1)]);
        fixture.push(event(2)).await;
        fixture.client.fail_with_status(500);

        let outcome = fixture.coordinator(false).flush().await;

        assert_eq!(outcome, FlushOutcome::Failed { events: 2 });
        assert_eq!(fixture.buffer.len(), 1);
        assert_eq!(fixture.storage.load().unwrap(), vec![event(1)]);
    }

    #[tokio::test]
    async fn dry_run_clears_without_transmitting() {
        let fixture = Fixture::new(vec![event(1)]);
        fixture.push(event(2)).await;

        let outcome = fixture.coordinator(true).flush().await;

        assert_eq!(outcome, FlushOutcome::DryRun { events: 2 });
        assert_eq!(outcome.delivered(), 2);
        assert!(fixture.client.payloads().is_empty());
        assert!(fixture.buffer.is_empty());
        assert!(fixture.storage.load().unwrap().is_empty());
    }
}
