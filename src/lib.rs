//! Client-side analytics event buffering and delivery.
//!
//! Hosts record pageviews, article engagement and video plays through a
//! [`Tracker`]. Events are buffered in memory, spill into a durable store
//! when the buffer fills up, and are sent as one batch on a fixed flush
//! interval. Engagement sessions emit heartbeats whose interval backs off
//! as the session gets longer.
//!
//! # Layout
//!
//! - `event`: event value, metadata and the event builder
//! - `queue`: in-memory buffer, flush scheduler and delivery coordinator
//! - `engagement`: heartbeat sessions and interval backoff
//! - `storage` / `delivery`: durable store and transport collaborators
//! - `runtime`: timer and blocking worker every callback goes through
//! - `tracker`: the host-facing facade

pub mod clock;
pub mod config;
pub mod delivery;
pub mod engagement;
pub mod event;
pub mod queue;
pub mod runtime;
pub mod storage;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, OverflowMode, TrackerConfig};
pub use delivery::{
    AlwaysReachable, DeliveryClient, DeliveryError, HttpDeliveryClient, Reachability,
    ReachabilityFlag,
};
pub use event::{
    Action, ContentMetadata, DeviceInfo, Event, Metadata, SiteIdSource, VideoMetadata,
};
pub use queue::{EventSink, FlushOutcome};
pub use storage::{MemoryStorage, SqliteStorage, Storage, StorageError};
pub use tracker::{Collaborators, DebugSnapshot, Tracker};

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("engagement session cannot start without a prior pageview")]
    EngagementWithoutPageview,
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Storage(#[from] StorageError),
    #[error("{0}")]
    Delivery(#[from] DeliveryError),
}

/// Install a fmt subscriber filtered by `RUST_LOG`, defaulting to
/// `trackbuffer=debug,info`. Does nothing if a subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackbuffer=debug,info".parse().expect("valid env filter")),
        )
        .try_init();
}
