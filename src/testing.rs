//! Fakes shared by unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::delivery::{DeliveryClient, DeliveryError};
use crate::event::{Action, Event};
use crate::queue::EventSink;

/// Records every payload it is asked to send.
#[derive(Default)]
pub struct FakeDeliveryClient {
    payloads: Mutex<Vec<(String, String)>>,
    fail_status: Mutex<Option<u16>>,
}

impl FakeDeliveryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail with `status`.
    pub fn fail_with_status(&self, status: u16) {
        *self.fail_status.lock().unwrap() = Some(status);
    }

    /// `(endpoint, payload)` pairs of successful sends.
    pub fn payloads(&self) -> Vec<(String, String)> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryClient for FakeDeliveryClient {
    async fn send(&self, endpoint: &str, payload: String) -> Result<(), DeliveryError> {
        if let Some(status) = *self.fail_status.lock().unwrap() {
            return Err(DeliveryError::Status {
                status,
                body: "fake failure".to_string(),
            });
        }
        self.payloads
            .lock()
            .unwrap()
            .push((endpoint.to_string(), payload));
        Ok(())
    }
}

/// Sink that keeps enqueued events for inspection.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn with_action(&self, action: Action) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|event| event.action() == Some(action))
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn enqueue(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Poll `condition` until it holds, letting timers and worker jobs run in
/// between. Panics if it never does.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    }
    panic!("condition was not reached");
}
