//! Engaged-time heartbeats.
//!
//! An [`EngagementManager`] owns one session: it re-emits a copy of its
//! base event on a growing interval (see [`interval`]) until stopped, and
//! on stop flushes the partially elapsed interval as one last heartbeat.

pub mod interval;

pub use interval::HeartbeatIntervalCalculator;

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde_json::Value;

use crate::clock::Clock;
use crate::event::{Event, KEY_INCREMENT, KEY_TIMESTAMP, KEY_TOTAL_TIME, KEY_URL, KEY_URL_REF};
use crate::queue::EventSink;
use crate::runtime::{TaskHandle, Timer};

struct PendingTick {
    handle: TaskHandle,
    delay: Duration,
    scheduled_at: Duration,
}

struct Session {
    running: bool,
    /// Bumped on every start so a tick from an earlier run never reschedules.
    generation: u64,
    start_time: Duration,
    latest_delay: Duration,
    total_ms: u64,
    pending: Option<PendingTick>,
}

struct Inner {
    base_event: Event,
    base_interval: Duration,
    session: Mutex<Session>,
    timer: Timer,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    calculator: HeartbeatIntervalCalculator,
}

/// Heartbeat scheduler for one article or video engagement session.
pub struct EngagementManager {
    inner: Arc<Inner>,
}

impl EngagementManager {
    pub fn new(
        base_event: Event,
        base_interval: Duration,
        timer: Timer,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let calculator = HeartbeatIntervalCalculator::new(Arc::clone(&clock));
        Self {
            inner: Arc::new(Inner {
                base_event,
                base_interval,
                session: Mutex::new(Session {
                    running: false,
                    generation: 0,
                    start_time: Duration::ZERO,
                    latest_delay: base_interval,
                    total_ms: 0,
                    pending: None,
                }),
                timer,
                sink,
                clock,
                calculator,
            }),
        }
    }

    /// Start (or resume) heartbeats; the first fires after the base
    /// interval. No-op while already running.
    ///
    /// Total time keeps accumulating across a stop and a later start.
    pub fn start(&self) {
        let mut session = self.inner.session();
        if session.running {
            return;
        }
        session.running = true;
        session.generation += 1;
        session.start_time = self.inner.clock.now();
        tracing::debug!(
            "starting {} heartbeats every {}ms",
            self.action_name(),
            self.inner.base_interval.as_millis()
        );
        Inner::schedule(&self.inner, &mut session, self.inner.base_interval);
    }

    /// Stop heartbeats. If a tick was still pending, emit one final
    /// heartbeat covering the time since the last one.
    ///
    /// Returns whether that final heartbeat was emitted. Stopping an idle
    /// session does nothing.
    pub fn stop(&self) -> bool {
        let event = {
            let mut session = self.inner.session();
            if !session.running {
                return false;
            }
            session.running = false;
            match session.pending.take() {
                Some(tick) if tick.handle.cancel() => {
                    Some(self.inner.heartbeat(&mut session, tick.delay, tick.scheduled_at))
                }
                _ => None,
            }
        };

        tracing::debug!("stopped {} heartbeats", self.action_name());
        match event {
            Some(event) => {
                self.inner.sink.enqueue(event);
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.session().running
    }

    /// Delay of the most recently scheduled tick.
    pub fn interval(&self) -> Duration {
        self.inner.session().latest_delay
    }

    pub fn base_event(&self) -> &Event {
        &self.inner.base_event
    }

    /// Whether this session tracks the given video: same url, referrer,
    /// content link and duration. A video without a link matches another
    /// without one.
    pub fn is_same_session(
        &self,
        url: &str,
        url_ref: &str,
        link: Option<&str>,
        duration_seconds: u32,
    ) -> bool {
        let event = &self.inner.base_event;
        let Some(metadata) = event.metadata() else {
            return false;
        };
        event.get(KEY_URL).and_then(Value::as_str) == Some(url)
            && event.get(KEY_URL_REF).and_then(Value::as_str) == Some(url_ref)
            && metadata.get("link").and_then(Value::as_str) == link
            && metadata.get("duration").and_then(Value::as_u64) == Some(u64::from(duration_seconds))
    }

    fn action_name(&self) -> &'static str {
        self.inner
            .base_event
            .action()
            .map(|action| action.as_str())
            .unwrap_or("engagement")
    }
}

impl Inner {
    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().expect("engagement session mutex poisoned")
    }

    fn schedule(inner: &Arc<Inner>, session: &mut Session, delay: Duration) {
        let weak: Weak<Inner> = Arc::downgrade(inner);
        let generation = session.generation;
        let scheduled_at = inner.clock.now() + delay;

        let handle = inner.timer.schedule_once(delay, move || {
            if let Some(inner) = weak.upgrade() {
                Inner::tick(&inner, generation, delay, scheduled_at);
            }
        });

        session.latest_delay = delay;
        session.pending = Some(PendingTick {
            handle,
            delay,
            scheduled_at,
        });
    }

    /// A tick that already fired always emits; it only reschedules while
    /// its own run is still active.
    fn tick(inner: &Arc<Inner>, generation: u64, delay: Duration, scheduled_at: Duration) {
        let event = {
            let mut session = inner.session();
            let event = inner.heartbeat(&mut session, delay, scheduled_at);
            if session.running && session.generation == generation {
                let next = inner.calculator.calculate(session.start_time);
                tracing::debug!("next heartbeat in {}ms", next.as_millis());
                Inner::schedule(inner, &mut session, next);
            } else if session.generation == generation {
                session.pending = None;
            }
            event
        };
        inner.sink.enqueue(event);
    }

    /// Copy of the base event stamped with "now", the drift-adjusted
    /// increment and the running total (both in whole seconds).
    fn heartbeat(&self, session: &mut Session, delay: Duration, scheduled_at: Duration) -> Event {
        let now = self.clock.now();
        let drift_ms = now.as_millis() as i128 - scheduled_at.as_millis() as i128;
        let inc_ms = (delay.as_millis() as i128 + drift_ms).max(0) as u64;
        session.total_ms += inc_ms;

        self.base_event
            .with_data_field(KEY_TIMESTAMP, self.clock.now_millis())
            .with_field(KEY_INCREMENT, inc_ms / 1000)
            .with_field(KEY_TOTAL_TIME, session.total_ms / 1000)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(session) = self.session.get_mut() {
            if let Some(tick) = session.pending.take() {
                tick.handle.cancel();
            }
        }
    }
}
