//! Time sources.
//!
//! Everything in the crate that needs "now" goes through [`Clock`] so tests
//! can drive time deterministically.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    /// Time elapsed since the unix epoch.
    fn now(&self) -> Duration;

    fn now_millis(&self) -> u64 {
        self.now().as_millis() as u64
    }
}

/// Monotonic clock anchored at the wall-clock time of its creation.
///
/// Readings never go backwards even if the system clock is adjusted, and
/// because it is built on `tokio::time::Instant` it follows the runtime's
/// virtual time when tokio's clock is paused.
#[derive(Debug, Clone)]
pub struct SystemClock {
    anchor_epoch: Duration,
    anchor: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        Self {
            anchor_epoch: Duration::from_millis(millis),
            anchor: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.anchor_epoch + self.anchor.elapsed()
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn new(start: Duration) -> Self {
        Self {
            millis: AtomicU64::new(start.as_millis() as u64),
        }
    }

    pub fn set(&self, now: Duration) {
        self.millis.store(now.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_millis(self.millis.load(Ordering::SeqCst))
    }
}
