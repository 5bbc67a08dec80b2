//! Shared fakes for tracker integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;

use trackbuffer::{
    Collaborators, DeliveryClient, DeliveryError, DeviceInfo, Event, ManualClock, MemoryStorage,
    ReachabilityFlag, Storage, StorageError, Tracker, TrackerConfig,
};

/// Delivery client that records payloads and can be told to fail.
#[derive(Default)]
pub struct FakeDeliveryClient {
    payloads: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl FakeDeliveryClient {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }

    /// Every event sent so far, across batches.
    pub fn sent_events(&self) -> Vec<Value> {
        events_in(&self.payloads())
    }

    pub fn sent_with_action(&self, action: &str) -> Vec<Value> {
        self.sent_events()
            .into_iter()
            .filter(|event| event["action"] == action)
            .collect()
    }
}

#[async_trait]
impl DeliveryClient for FakeDeliveryClient {
    async fn send(&self, _endpoint: &str, payload: String) -> Result<(), DeliveryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DeliveryError::Request("connection reset".to_string()));
        }
        self.payloads.lock().unwrap().push(payload);
        Ok(())
    }
}

/// Delivery client whose sends wait for [`GatedDeliveryClient::release`]
/// and that records how many sends overlapped.
pub struct GatedDeliveryClient {
    gate: watch::Sender<bool>,
    hold: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    payloads: Mutex<Vec<String>>,
}

impl GatedDeliveryClient {
    /// Sends block until released.
    pub fn closed() -> Self {
        Self::with_gate(false, Duration::ZERO)
    }

    /// Sends go through after sleeping `hold`.
    pub fn open_with_hold(hold: Duration) -> Self {
        Self::with_gate(true, hold)
    }

    fn with_gate(open: bool, hold: Duration) -> Self {
        Self {
            gate: watch::channel(open).0,
            hold,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn sent_events(&self) -> Vec<Value> {
        events_in(&self.payloads.lock().unwrap())
    }
}

#[async_trait]
impl DeliveryClient for GatedDeliveryClient {
    async fn send(&self, _endpoint: &str, payload: String) -> Result<(), DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(in_flight, Ordering::SeqCst);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;
        tokio::time::sleep(self.hold).await;

        self.payloads.lock().unwrap().push(payload);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// In-memory store whose loads block while the gate is closed.
pub struct GatedStorage {
    inner: MemoryStorage,
    open: Mutex<bool>,
    opened: Condvar,
    loads_started: AtomicUsize,
}

impl GatedStorage {
    pub fn closed() -> Self {
        Self {
            inner: MemoryStorage::new(),
            open: Mutex::new(false),
            opened: Condvar::new(),
            loads_started: AtomicUsize::new(0),
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    pub fn loads_started(&self) -> usize {
        self.loads_started.load(Ordering::SeqCst)
    }
}

impl Storage for GatedStorage {
    fn load(&self) -> Result<Vec<Event>, StorageError> {
        self.loads_started.fetch_add(1, Ordering::SeqCst);
        let open = self.open.lock().unwrap();
        let _open = self.opened.wait_while(open, |open| !*open).unwrap();
        self.inner.load()
    }

    fn save(&self, events: &[Event]) -> Result<(), StorageError> {
        self.inner.save(events)
    }
}

/// Events of every `{"events": [...]}` batch in `payloads`.
pub fn events_in(payloads: &[String]) -> Vec<Value> {
    payloads
        .iter()
        .flat_map(|payload| {
            let batch: Value = serde_json::from_str(payload).expect("payload is json");
            batch["events"].as_array().cloned().unwrap_or_default()
        })
        .collect()
}

pub struct Harness {
    pub tracker: Tracker,
    pub client: Arc<FakeDeliveryClient>,
    pub storage: Arc<MemoryStorage>,
    pub reachability: Arc<ReachabilityFlag>,
    pub clock: Arc<ManualClock>,
}

pub fn config() -> TrackerConfig {
    TrackerConfig::new("example.com")
}

pub fn harness(config: TrackerConfig) -> Harness {
    harness_with_stored(config, Vec::new())
}

/// Tracker on the current runtime whose store already holds `stored`.
pub fn harness_with_stored(config: TrackerConfig, stored: Vec<Event>) -> Harness {
    let client = Arc::new(FakeDeliveryClient::default());
    let storage = Arc::new(MemoryStorage::with_events(stored));
    let reachability = Arc::new(ReachabilityFlag::default());
    let clock = Arc::new(ManualClock::new(Duration::from_millis(1_700_000_000_000)));

    let tracker = Tracker::new(
        config,
        Collaborators {
            storage: storage.clone(),
            client: client.clone(),
            reachability: reachability.clone(),
            clock: clock.clone(),
            device_info: device_info(),
        },
        Handle::current(),
    )
    .expect("tracker");

    Harness {
        tracker,
        client,
        storage,
        reachability,
        clock,
    }
}

/// Tracker on `runtime` over the given store and client, always reachable.
pub fn build_tracker(
    config: TrackerConfig,
    storage: Arc<dyn Storage>,
    client: Arc<dyn DeliveryClient>,
    runtime: Handle,
) -> Tracker {
    Tracker::new(
        config,
        Collaborators {
            storage,
            client,
            reachability: Arc::new(ReachabilityFlag::default()),
            clock: Arc::new(ManualClock::new(Duration::from_millis(1_700_000_000_000))),
            device_info: device_info(),
        },
        runtime,
    )
    .expect("tracker")
}

fn device_info() -> DeviceInfo {
    let mut device_info = DeviceInfo::new();
    device_info.insert("os".to_string(), "android".to_string());
    device_info.insert("manufacturer".to_string(), "acme".to_string());
    device_info
}

/// Poll `condition` in real time until it holds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was not reached");
}
