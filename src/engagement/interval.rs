use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;

pub const MAX_INTERVAL: Duration = Duration::from_secs(60 * 60);
pub const OFFSET_MATCHING_BASE_INTERVAL: Duration = Duration::from_secs(35);
pub const BACKOFF_PROPORTION: f64 = 0.3;

/// Heartbeat backoff: `min(MAX_INTERVAL, (elapsed + OFFSET) * 0.3)`.
///
/// The offset makes the first interval equal the default base interval
/// (10.5s) and the cap is reached after roughly 3h19m of engagement.
pub fn next_interval(elapsed: Duration) -> Duration {
    let elapsed_ms = elapsed.as_millis() as f64;
    let offset_ms = OFFSET_MATCHING_BASE_INTERVAL.as_millis() as f64;
    let next_ms = ((elapsed_ms + offset_ms) * BACKOFF_PROPORTION).round();
    let capped = next_ms.min(MAX_INTERVAL.as_millis() as f64);
    Duration::from_millis(capped as u64)
}

/// [`next_interval`] measured against a clock.
#[derive(Clone)]
pub struct HeartbeatIntervalCalculator {
    clock: Arc<dyn Clock>,
}

impl HeartbeatIntervalCalculator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Interval before the next heartbeat of a session that started at
    /// `start` (clock time). A start in the future counts as zero elapsed.
    pub fn calculate(&self, start: Duration) -> Duration {
        next_interval(self.clock.now().saturating_sub(start))
    }
}
