// ABOUTME: Log tail manager running one polling loop or push stream per open log view
// Updates from every tail funnel into one queue; closing a tail cancels its timers

use crate::error::{ConsoleError, Result};
use crate::inventory::InventoryClient;
use crate::logs::LogMode;
use crate::models::TargetId;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LogTailId(Uuid);

impl LogTailId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LogTailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogUpdate {
    /// A full fetch; replaces whatever the view shows
    Replace(String),
    /// A pushed chunk
    Append(String),
    Failed(ConsoleError),
    /// The push stream was closed by the server
    Ended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTailEvent {
    pub tail_id: LogTailId,
    pub target_id: TargetId,
    pub update: LogUpdate,
}

/// Sender handed to fetch tasks and streamers, stamped with the owning tail
#[derive(Debug, Clone)]
pub struct LogUpdateSender {
    tail_id: LogTailId,
    target_id: TargetId,
    tx: mpsc::UnboundedSender<LogTailEvent>,
}

impl LogUpdateSender {
    pub fn target_id(&self) -> &TargetId {
        &self.target_id
    }

    /// Returns false once the manager is gone
    pub fn send(&self, update: LogUpdate) -> bool {
        self.tx
            .send(LogTailEvent {
                tail_id: self.tail_id,
                target_id: self.target_id.clone(),
                update,
            })
            .is_ok()
    }
}

/// Source of pushed log chunks. `stream` runs until the server closes the stream.
#[async_trait]
pub trait LogStreamer: Send + Sync {
    async fn stream(&self, target_id: &TargetId, updates: LogUpdateSender) -> Result<()>;
}

struct LogTail {
    target_id: TargetId,
    auto_refresh: Option<Duration>,
    timer: Option<JoinHandle<()>>,
    stream: Option<JoinHandle<()>>,
    fetches: Vec<JoinHandle<()>>,
}

impl LogTail {
    fn cancel(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(stream) = self.stream.take() {
            stream.abort();
        }
        for fetch in self.fetches.drain(..) {
            fetch.abort();
        }
    }
}

pub struct LogTailManager {
    client: Arc<dyn InventoryClient>,
    streamer: Option<Arc<dyn LogStreamer>>,
    mode: LogMode,
    default_interval: Duration,
    tails: HashMap<LogTailId, LogTail>,
    updates_tx: mpsc::UnboundedSender<LogTailEvent>,
    updates_rx: mpsc::UnboundedReceiver<LogTailEvent>,
}

impl LogTailManager {
    /// Push mode without a streamer falls back to polling
    pub fn new(
        client: Arc<dyn InventoryClient>,
        streamer: Option<Arc<dyn LogStreamer>>,
        mode: LogMode,
        default_interval: Duration,
    ) -> Self {
        let mode = match (mode, &streamer) {
            (LogMode::Push, None) => {
                warn!("Push log mode requested without a streamer, polling instead");
                LogMode::Poll
            }
            (mode, _) => mode,
        };
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            client,
            streamer,
            mode,
            default_interval,
            tails: HashMap::new(),
            updates_tx,
            updates_rx,
        }
    }

    pub fn mode(&self) -> LogMode {
        self.mode
    }

    fn sender(&self, tail_id: LogTailId, target_id: &TargetId) -> LogUpdateSender {
        LogUpdateSender {
            tail_id,
            target_id: target_id.clone(),
            tx: self.updates_tx.clone(),
        }
    }

    /// Start a tail. Polling tails load once immediately; push tails start streaming.
    pub fn open(&mut self, target_id: &TargetId) -> LogTailId {
        let tail_id = LogTailId::new();
        let updates = self.sender(tail_id, target_id);
        let mut tail = LogTail {
            target_id: target_id.clone(),
            auto_refresh: None,
            timer: None,
            stream: None,
            fetches: Vec::new(),
        };

        match (self.mode, &self.streamer) {
            (LogMode::Push, Some(streamer)) => {
                let streamer = Arc::clone(streamer);
                let target = target_id.clone();
                tail.stream = Some(tokio::spawn(async move {
                    if let Err(e) = streamer.stream(&target, updates.clone()).await {
                        warn!("Log stream for {} failed: {}", target, e);
                        updates.send(LogUpdate::Failed(e));
                    }
                    updates.send(LogUpdate::Ended);
                }));
            }
            _ => {
                tail.fetches.push(spawn_fetch(Arc::clone(&self.client), updates));
            }
        }

        info!("Opened {:?} log tail {} for {}", self.mode, tail_id, target_id);
        self.tails.insert(tail_id, tail);
        tail_id
    }

    /// Toggle periodic re-fetching. `interval` defaults to the configured refresh interval.
    pub fn set_auto_refresh(
        &mut self,
        tail_id: LogTailId,
        enabled: bool,
        interval: Option<Duration>,
    ) -> Result<()> {
        let period = interval.unwrap_or(self.default_interval);
        let updates = match self.tails.get(&tail_id) {
            Some(tail) => self.sender(tail_id, &tail.target_id),
            None => return Err(ConsoleError::UnknownLogTail(tail_id.to_string())),
        };
        let client = Arc::clone(&self.client);
        let push = self.mode == LogMode::Push;

        let Some(tail) = self.tails.get_mut(&tail_id) else {
            return Err(ConsoleError::UnknownLogTail(tail_id.to_string()));
        };
        if let Some(timer) = tail.timer.take() {
            timer.abort();
        }

        if !enabled || period.is_zero() {
            tail.auto_refresh = None;
            debug!("Auto-refresh disabled for log tail {}", tail_id);
            return Ok(());
        }

        tail.auto_refresh = Some(period);
        if push {
            // The push stream already delivers new content as it arrives
            debug!("Auto-refresh recorded for push tail {}", tail_id);
            return Ok(());
        }

        tail.timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately; the view was just loaded
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !fetch_into(client.as_ref(), &updates).await {
                    break;
                }
            }
        }));
        debug!("Auto-refresh every {:?} for log tail {}", period, tail_id);
        Ok(())
    }

    pub fn auto_refresh(&self, tail_id: LogTailId) -> Option<Duration> {
        self.tails.get(&tail_id).and_then(|t| t.auto_refresh)
    }

    /// Re-fetch once regardless of auto-refresh
    pub fn refresh(&mut self, tail_id: LogTailId) -> Result<()> {
        let updates = match self.tails.get(&tail_id) {
            Some(tail) => self.sender(tail_id, &tail.target_id),
            None => return Err(ConsoleError::UnknownLogTail(tail_id.to_string())),
        };
        let fetch = spawn_fetch(Arc::clone(&self.client), updates);
        if let Some(tail) = self.tails.get_mut(&tail_id) {
            tail.fetches.retain(|f| !f.is_finished());
            tail.fetches.push(fetch);
        }
        Ok(())
    }

    /// Cancel timers and release the stream. Always safe.
    pub fn close(&mut self, tail_id: LogTailId) -> bool {
        match self.tails.remove(&tail_id) {
            Some(mut tail) => {
                tail.cancel();
                info!("Closed log tail {} for {}", tail_id, tail.target_id);
                true
            }
            None => false,
        }
    }

    pub fn close_all(&mut self) {
        for (_, mut tail) in self.tails.drain() {
            tail.cancel();
        }
    }

    /// Fetch the full log. The returned future does not borrow the manager.
    pub fn download(&self, target_id: &TargetId) -> impl Future<Output = Result<Vec<u8>>> + Send + 'static {
        let client = Arc::clone(&self.client);
        let target_id = target_id.clone();
        async move { client.download_logs(&target_id).await }
    }

    pub fn target_of(&self, tail_id: LogTailId) -> Option<&TargetId> {
        self.tails.get(&tail_id).map(|t| &t.target_id)
    }

    pub fn is_open(&self, tail_id: LogTailId) -> bool {
        self.tails.contains_key(&tail_id)
    }

    pub fn len(&self) -> usize {
        self.tails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tails.is_empty()
    }

    /// Next update for a tail that is still open; late results of closed tails are dropped
    pub async fn next_update(&mut self) -> Option<LogTailEvent> {
        loop {
            let event = self.updates_rx.recv().await?;
            if self.accept(&event) {
                return Some(event);
            }
        }
    }

    fn accept(&mut self, event: &LogTailEvent) -> bool {
        if !self.tails.contains_key(&event.tail_id) {
            debug!("Dropping update for closed log tail {}", event.tail_id);
            return false;
        }
        if event.update == LogUpdate::Ended {
            if let Some(tail) = self.tails.get_mut(&event.tail_id) {
                tail.stream = None;
            }
        }
        true
    }
}

impl Drop for LogTailManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

fn spawn_fetch(client: Arc<dyn InventoryClient>, updates: LogUpdateSender) -> JoinHandle<()> {
    tokio::spawn(async move {
        fetch_into(client.as_ref(), &updates).await;
    })
}

/// One fetch, reported as Replace or Failed. Returns false once nobody is listening.
async fn fetch_into(client: &dyn InventoryClient, updates: &LogUpdateSender) -> bool {
    let update = match client.fetch_logs(updates.target_id()).await {
        Ok(text) => LogUpdate::Replace(text),
        Err(e) => {
            warn!("Log fetch for {} failed: {}", updates.target_id(), e);
            LogUpdate::Failed(e)
        }
    };
    updates.send(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::client::MockInventoryClient;

    fn target() -> TargetId {
        TargetId::new("c1").unwrap()
    }

    #[tokio::test]
    async fn test_poll_tail_loads_once_on_open() {
        let mut client = MockInventoryClient::new();
        client
            .expect_fetch_logs()
            .times(1)
            .returning(|_| Ok("line 1\nline 2\n".to_string()));

        let mut manager =
            LogTailManager::new(Arc::new(client), None, LogMode::Poll, Duration::from_secs(2));
        let tail = manager.open(&target());

        let event = manager.next_update().await.unwrap();
        assert_eq!(event.tail_id, tail);
        assert_eq!(event.update, LogUpdate::Replace("line 1\nline 2\n".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_tail_is_rejected() {
        let client = MockInventoryClient::new();
        let mut manager =
            LogTailManager::new(Arc::new(client), None, LogMode::Poll, Duration::from_secs(2));
        let bogus = LogTailId::new();

        assert!(matches!(
            manager.refresh(bogus),
            Err(ConsoleError::UnknownLogTail(_))
        ));
        assert!(matches!(
            manager.set_auto_refresh(bogus, true, None),
            Err(ConsoleError::UnknownLogTail(_))
        ));
        assert!(!manager.close(bogus));
    }

    #[tokio::test]
    async fn test_push_without_streamer_polls() {
        let client = MockInventoryClient::new();
        let manager =
            LogTailManager::new(Arc::new(client), None, LogMode::Push, Duration::from_secs(2));
        assert_eq!(manager.mode(), LogMode::Poll);
    }
}
