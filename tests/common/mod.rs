// ABOUTME: Shared fakes for integration tests: scripted inventory and an in-memory dialer
// The dialer hands each test the event sender and outbound queue of every channel it opened

#![allow(dead_code)]

use async_trait::async_trait;
use container_console::error::{ConsoleError, Result};
use container_console::inventory::InventoryClient;
use container_console::models::{Target, TargetId, TargetStatus};
use container_console::terminal::{ChannelEvent, ChannelEvents, Dialer, Framing, TransportChannel, WireFrame};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

pub fn running(id: &str, name: &str) -> Target {
    Target::new(id, name, TargetStatus::Running)
}

pub fn stopped(id: &str, name: &str) -> Target {
    Target::new(id, name, TargetStatus::Stopped)
}

pub fn id(raw: &str) -> TargetId {
    TargetId::new(raw).unwrap()
}

struct DialRecord {
    target_id: TargetId,
    events: ChannelEvents,
    outbound: mpsc::UnboundedReceiver<WireFrame>,
    received: Vec<WireFrame>,
}

#[derive(Default)]
struct DialerState {
    dials: Vec<DialRecord>,
    fail_with: Option<String>,
}

/// Dialer whose channels are driven by the test
#[derive(Default)]
pub struct FakeDialer {
    state: Mutex<DialerState>,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following dial fail synchronously
    pub fn fail_dials(&self, reason: &str) {
        self.state.lock().unwrap().fail_with = Some(reason.to_string());
    }

    pub fn dial_count(&self) -> usize {
        self.state.lock().unwrap().dials.len()
    }

    pub fn dial_count_for(&self, target_id: &TargetId) -> usize {
        self.state
            .lock()
            .unwrap()
            .dials
            .iter()
            .filter(|d| &d.target_id == target_id)
            .count()
    }

    /// Report a channel event for the n-th dial
    pub fn emit(&self, dial: usize, event: ChannelEvent) -> bool {
        self.state.lock().unwrap().dials[dial].events.emit(event)
    }

    /// Every frame the n-th channel has sent so far
    pub fn sent(&self, dial: usize) -> Vec<WireFrame> {
        let mut state = self.state.lock().unwrap();
        let record = &mut state.dials[dial];
        while let Ok(frame) = record.outbound.try_recv() {
            record.received.push(frame);
        }
        record.received.clone()
    }

    /// True once the n-th channel's write half has been dropped
    pub fn is_released(&self, dial: usize) -> bool {
        let mut state = self.state.lock().unwrap();
        let record = &mut state.dials[dial];
        loop {
            match record.outbound.try_recv() {
                Ok(frame) => record.received.push(frame),
                Err(mpsc::error::TryRecvError::Empty) => return false,
                Err(mpsc::error::TryRecvError::Disconnected) => return true,
            }
        }
    }
}

impl Dialer for FakeDialer {
    fn dial(&self, target_id: &TargetId, framing: Framing, events: ChannelEvents) -> Result<TransportChannel> {
        let mut state = self.state.lock().unwrap();
        if let Some(reason) = &state.fail_with {
            return Err(ConsoleError::TransportOpenFailed {
                target: target_id.to_string(),
                reason: reason.clone(),
            });
        }
        let (channel, outbound) = TransportChannel::pair(target_id.clone(), framing);
        state.dials.push(DialRecord {
            target_id: target_id.clone(),
            events,
            outbound,
            received: Vec::new(),
        });
        Ok(channel)
    }
}

/// Inventory whose answers are set by the test
pub struct FakeInventory {
    targets: Mutex<Result<Vec<Target>>>,
    logs: Mutex<Result<String>>,
    healthy: AtomicBool,
    target_fetches: AtomicUsize,
    probes: AtomicUsize,
}

impl FakeInventory {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets: Mutex::new(Ok(targets)),
            logs: Mutex::new(Ok(String::new())),
            healthy: AtomicBool::new(true),
            target_fetches: AtomicUsize::new(0),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_targets(&self, targets: Vec<Target>) {
        *self.targets.lock().unwrap() = Ok(targets);
    }

    pub fn fail_targets(&self, error: ConsoleError) {
        *self.targets.lock().unwrap() = Err(error);
    }

    pub fn set_logs(&self, logs: Result<String>) {
        *self.logs.lock().unwrap() = logs;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn target_fetches(&self) -> usize {
        self.target_fetches.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InventoryClient for FakeInventory {
    async fn fetch_targets(&self) -> Result<Vec<Target>> {
        self.target_fetches.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().clone()
    }

    async fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.healthy.load(Ordering::SeqCst)
    }

    async fn fetch_logs(&self, _target_id: &TargetId) -> Result<String> {
        self.logs.lock().unwrap().clone()
    }

    async fn download_logs(&self, _target_id: &TargetId) -> Result<Vec<u8>> {
        self.logs.lock().unwrap().clone().map(String::into_bytes)
    }
}
