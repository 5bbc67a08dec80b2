//! Collaborators on the delivery side of a flush: the transport that
//! ships a serialized batch and the connectivity probe consulted before
//! trying.

mod http;

pub use http::HttpDeliveryClient;

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::event::Event;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("request timeout: {0}")]
    Timeout(String),
    #[error("collector responded {status}: {body}")]
    Status { status: u16, body: String },
    #[error("batch serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for DeliveryError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            return Self::Timeout(value.to_string());
        }
        Self::Request(value.to_string())
    }
}

/// Ships one serialized batch to the collector.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send(&self, endpoint: &str, payload: String) -> Result<(), DeliveryError>;
}

pub trait Reachability: Send + Sync {
    fn is_reachable(&self) -> bool;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysReachable;

impl Reachability for AlwaysReachable {
    fn is_reachable(&self) -> bool {
        true
    }
}

/// Connectivity state pushed in by the host's platform network monitor.
#[derive(Debug)]
pub struct ReachabilityFlag {
    reachable: AtomicBool,
}

impl ReachabilityFlag {
    pub fn new(reachable: bool) -> Self {
        Self {
            reachable: AtomicBool::new(reachable),
        }
    }

    pub fn set(&self, reachable: bool) {
        let previous = self.reachable.swap(reachable, Ordering::SeqCst);
        if previous != reachable {
            tracing::debug!("network reachability changed: {reachable}");
        }
    }
}

impl Default for ReachabilityFlag {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Reachability for ReachabilityFlag {
    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }
}

#[derive(Serialize)]
struct BatchPayload<'a> {
    events: &'a [Event],
}

/// Serialize a batch into the collector's `{"events": [...]}` envelope.
/// Events are passed through whole.
pub fn encode_batch(events: &[Event]) -> Result<String, serde_json::Error> {
    serde_json::to_string(&BatchPayload { events })
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn batch_envelope_wraps_events_unchanged() {
        let event: Event =
            serde_json::from_value(json!({ "action": "pageview", "data": { "ts": 5 } })).unwrap();

        let payload = encode_batch(&[event]).unwrap();
        let parsed: Value = serde_json::from_str(&payload).unwrap();

        assert_eq!(
            parsed,
            json!({ "events": [ { "action": "pageview", "data": { "ts": 5 } } ] })
        );
    }

    #[test]
    fn reachability_flag_tracks_host_updates() {
        let flag = ReachabilityFlag::default();
        assert!(flag.is_reachable());

        flag.set(false);
        assert!(!flag.is_reachable());
    }
}
